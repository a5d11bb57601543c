pub mod memory;
pub mod rabbitmq;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::QueueError;

pub use memory::MemoryChannel;
pub use rabbitmq::RabbitMqChannel;

// ─── Topology ────────────────────────────────────────────────────

/// Fanout exchange every producer publishes to.
pub const EXCHANGE: &str = "metric_collector";

pub const DISTINCT_NAME_QUEUE: &str = "distinctName";
pub const HOURLY_LOG_QUEUE: &str = "hourlyLog";
pub const ACCOUNT_NAME_QUEUE: &str = "accountName";

/// Every queue bound to [`EXCHANGE`], one per worker kind.
pub const QUEUES: [&str; 3] = [DISTINCT_NAME_QUEUE, HOURLY_LOG_QUEUE, ACCOUNT_NAME_QUEUE];

// ─── Payload ─────────────────────────────────────────────────────

/// The unit of work flowing through the system.
/// Serialized on the wire as `{"username": .., "count": .., "metric": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub username: String,
    pub count: i64,
    pub metric: String,
}

impl MetricEvent {
    pub fn new(username: impl Into<String>, count: i64, metric: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            count,
            metric: metric.into(),
        }
    }
}

// ─── Channel abstraction ─────────────────────────────────────────

/// Unbounded, non-restartable sequence of deliveries for one queue.
/// Yields `None` once the underlying transport goes away.
pub type MessageStream = mpsc::UnboundedReceiver<Box<dyn InFlightMessage>>;

/// Topology declaration, publishing and consumption over some transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Creates a fanout exchange. Declaring it twice is a no-op.
    async fn declare_exchange(&self, exchange: &str, durable: bool) -> Result<(), QueueError>;

    /// Creates a queue and binds it to `exchange` with no routing key.
    async fn declare_queue(
        &self,
        exchange: &str,
        queue: &str,
        durable: bool,
    ) -> Result<(), QueueError>;

    /// Fans `event` out to every queue bound to `exchange`.
    async fn publish_metric(&self, exchange: &str, event: &MetricEvent) -> Result<(), QueueError>;

    /// Starts consuming `queue`. Fails with [`QueueError::QueueNotFound`]
    /// when the queue was never declared.
    async fn consume_metrics(&self, queue: &str) -> Result<MessageStream, QueueError>;

    /// Releases the connection and ends every open [`MessageStream`].
    async fn close(&self) -> Result<(), QueueError>;
}

/// Declares [`EXCHANGE`] and binds every queue in [`QUEUES`] to it.
pub async fn declare_topology(channel: &dyn Channel, durable: bool) -> Result<(), QueueError> {
    debug!(exchange = EXCHANGE, "declaring exchange");
    channel.declare_exchange(EXCHANGE, durable).await?;
    for queue in QUEUES {
        debug!(queue, "declaring queue");
        channel.declare_queue(EXCHANGE, queue, durable).await?;
    }
    Ok(())
}

/// A delivered [`MetricEvent`] together with its acknowledgement capability.
#[async_trait]
pub trait InFlightMessage: Send + Sync {
    /// Decodes the payload on first call; later calls return the cached value.
    fn metric_data(&mut self) -> Result<MetricEvent, QueueError>;

    /// Marks the message as processed and stored.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Rejects the message so the transport can redeliver it.
    async fn nack(&self) -> Result<(), QueueError>;
}

/// Shared decode step for transports carrying raw JSON bodies.
pub(crate) fn decode_body(
    cache: &mut Option<MetricEvent>,
    body: &[u8],
) -> Result<MetricEvent, QueueError> {
    if let Some(event) = cache {
        return Ok(event.clone());
    }
    let event: MetricEvent =
        serde_json::from_slice(body).map_err(|e| QueueError::Decode(e.to_string()))?;
    *cache = Some(event.clone());
    Ok(event)
}
