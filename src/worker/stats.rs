use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use super::Processor;
use crate::error::ProcessError;
use crate::queue::MetricEvent;

/// Running counters of a wrapped processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub processed_count: i64,
    pub error_count: i64,
    /// Mean of `MetricEvent::count` over every processed event
    pub avg_count: f64,
    /// Mean wall time of the wrapped `process` call, in seconds
    pub avg_latency_secs: f64,
}

impl ProcessorStats {
    fn record(&mut self, count: i64, elapsed_secs: f64, failed: bool) {
        let n = self.processed_count;
        self.avg_count = next_avg(self.avg_count, n, count as f64);
        self.avg_latency_secs = next_avg(self.avg_latency_secs, n, elapsed_secs);
        self.processed_count = n + 1;
        if failed {
            self.error_count += 1;
        }
    }
}

/// Mean of `n` values averaging `current`, plus `value`.
pub fn next_avg(current: f64, n: i64, value: f64) -> f64 {
    (current * n as f64 + value) / (n + 1) as f64
}

/// Receives a copy of the counters after every update.
pub trait StatsSink: Send + Sync {
    fn publish(&self, stats: &ProcessorStats, latency: Duration);
}

/// Wraps another processor and keeps [`ProcessorStats`] on it.
/// Errors from the wrapped processor are recorded, then returned unchanged.
pub struct StatsProcessor {
    inner: Arc<dyn Processor>,
    stats: Mutex<ProcessorStats>,
    sink: Option<Arc<dyn StatsSink>>,
}

impl StatsProcessor {
    pub fn new(inner: Arc<dyn Processor>, sink: Option<Arc<dyn StatsSink>>) -> Self {
        Self {
            inner,
            stats: Mutex::new(ProcessorStats::default()),
            sink,
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        *self.stats.lock()
    }
}

#[async_trait]
impl Processor for StatsProcessor {
    async fn process(&self, event: &MetricEvent) -> Result<(), ProcessError> {
        let start = Instant::now();
        let result = self.inner.process(event).await;
        let elapsed = start.elapsed();

        let snapshot = {
            let mut stats = self.stats.lock();
            stats.record(event.count, elapsed.as_secs_f64(), result.is_err());
            *stats
        };

        if let Some(sink) = &self.sink {
            sink.publish(&snapshot, elapsed);
        }

        result
    }
}
