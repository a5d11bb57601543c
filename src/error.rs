use thiserror::Error;

// ─── Queue layer ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("could not declare '{name}': {reason}")]
    Declare { name: String, reason: String },

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("queue '{0}' already has a consumer")]
    AlreadyConsuming(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("malformed metric payload: {0}")]
    Decode(String),
}

impl From<lapin::Error> for QueueError {
    fn from(e: lapin::Error) -> Self {
        QueueError::Connection(e.to_string())
    }
}

// ─── Store layer ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ─── Processing ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

// ─── Worker engine ───────────────────────────────────────────────

/// Terminal outcome of a worker run. Every variant is fatal to the caller.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("processor had too many errors ({consecutive} in a row)")]
    TooManyErrors { consecutive: u32 },

    #[error("disconnected from metrics queue")]
    Disconnected,

    #[error("could not consume from queue: {0}")]
    Consume(#[from] QueueError),
}

// ─── Backoff ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("maximum retry attempts exceeded ({0})")]
pub struct RetriesExhausted(pub u32);
