pub mod stats;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::error::{ProcessError, WorkerError};
use crate::queue::{Channel, InFlightMessage, MetricEvent};

pub use stats::{ProcessorStats, StatsProcessor, StatsSink};

/// Consecutive failures after which a worker stops consuming.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default bound on messages processed at the same time.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 3;

/// Persists one [`MetricEvent`] somewhere.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, event: &MetricEvent) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages dispatched but not yet settled, at most.
    pub max_in_flight: usize,
    /// Run of failures that opens the circuit.
    pub max_consecutive_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Result of one message, reported to the error checker.
struct Outcome {
    success: bool,
}

/// What the error checker has seen so far, published after every outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Breaker {
    /// Current run of failures, reset by any success
    failures: u32,
    /// Messages whose outcome has been reported
    settled: u64,
    /// Length of the run that opened the circuit
    tripped: Option<u32>,
}

impl Breaker {
    /// Whether one more message may be dispatched with `dispatched` sent so
    /// far. Every message in flight may still fail, so the run plus the
    /// in-flight count stays below `threshold` and the circuit opens on
    /// exactly `threshold` failures.
    fn admits(&self, dispatched: u64, config: &WorkerConfig) -> bool {
        let in_flight = dispatched.saturating_sub(self.settled);
        in_flight < config.max_in_flight as u64
            && u64::from(self.failures) + in_flight < u64::from(config.max_consecutive_failures)
    }
}

// ─── Consumption loop ────────────────────────────────────────────

/// Consumes `queue` and feeds every message through `processor`.
///
/// Each message runs in its own task: processed, then acked on success or
/// nacked on failure. The loop only returns on a terminal condition, either
/// the circuit opening after `max_consecutive_failures` failures in a row or
/// the message stream closing. Tasks already dispatched are left to finish.
///
/// Up to `max_in_flight` messages run at once while things go well. During a
/// run of failures the loop dispatches less, so that no more than
/// `max_consecutive_failures` messages are ever nacked in a row.
pub async fn run_worker(
    channel: &dyn Channel,
    queue: &str,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
) -> WorkerError {
    let mut messages = match channel.consume_metrics(queue).await {
        Ok(messages) => messages,
        Err(e) => {
            error!(queue, error = %e, "could not consume from queue");
            return WorkerError::Consume(e);
        }
    };

    let config = WorkerConfig {
        max_in_flight: config.max_in_flight.max(1),
        max_consecutive_failures: config.max_consecutive_failures.max(1),
    };
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let (breaker_tx, mut breaker) = watch::channel(Breaker::default());
    tokio::spawn(error_check(
        results_rx,
        breaker_tx,
        config.max_consecutive_failures,
    ));

    let mut dispatched = 0u64;
    loop {
        let tripped = match breaker
            .wait_for(|b| b.tripped.is_some() || b.admits(dispatched, &config))
            .await
        {
            Ok(b) => b.tripped,
            Err(_) => return WorkerError::Disconnected,
        };
        if let Some(consecutive) = tripped {
            return too_many_errors(consecutive);
        }

        // Admitted dispatches cannot open the circuit while we wait here
        let msg = match messages.recv().await {
            Some(msg) => msg,
            None => {
                error!(queue, "disconnected from metrics queue");
                return WorkerError::Disconnected;
            }
        };

        dispatched += 1;
        tokio::spawn(handle_message(msg, processor.clone(), results_tx.clone()));
    }
}

fn too_many_errors(consecutive: u32) -> WorkerError {
    error!(consecutive, "processor had too many errors, quitting");
    WorkerError::TooManyErrors { consecutive }
}

async fn handle_message(
    mut msg: Box<dyn InFlightMessage>,
    processor: Arc<dyn Processor>,
    results: mpsc::UnboundedSender<Outcome>,
) {
    let success = match msg.metric_data() {
        Ok(event) => {
            debug!(?event, "processing metric");
            match processor.process(&event).await {
                Ok(()) => {
                    if let Err(e) = msg.ack().await {
                        warn!(error = %e, "could not ack processed metric");
                    }
                    true
                }
                Err(e) => {
                    warn!(error = %e, "error while processing a metric, won't ack");
                    nack(msg.as_ref()).await;
                    false
                }
            }
        }
        Err(e) => {
            error!(error = %e, "unexpected error reading metric data");
            nack(msg.as_ref()).await;
            false
        }
    };

    // The checker outlives every task unless the engine is gone
    let _ = results.send(Outcome { success });
}

async fn nack(msg: &dyn InFlightMessage) {
    if let Err(e) = msg.nack().await {
        warn!(error = %e, "could not nack metric");
    }
}

// ─── Circuit breaker ─────────────────────────────────────────────

/// Sole owner of the consecutive-failure count. Publishes a [`Breaker`]
/// after every outcome and latches `tripped` once the run reaches
/// `threshold`.
async fn error_check(
    mut results: mpsc::UnboundedReceiver<Outcome>,
    breaker: watch::Sender<Breaker>,
    threshold: u32,
) {
    while let Some(outcome) = results.recv().await {
        breaker.send_modify(|b| {
            b.settled += 1;
            if outcome.success {
                b.failures = 0;
            } else {
                b.failures += 1;
            }
            if b.failures >= threshold && b.tripped.is_none() {
                b.tripped = Some(b.failures);
            }
        });
    }
}
