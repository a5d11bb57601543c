use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::LatencyPercentiles;
use crate::worker::{ProcessorStats, StatsSink};

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Process-wide view of the stats decorator, served on `/debug/vars`.
/// The decorator pushes through [`StatsSink`], the HTTP handler reads
/// [`StatsRegistry::snapshot`].
pub struct StatsRegistry {
    inner: Mutex<Inner>,
}

/// Everything the debug endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub n_metrics: i64,
    pub n_errors: i64,
    pub avg_count: f64,
    /// Seconds
    pub avg_process_time: f64,
    pub latency: LatencyPercentiles,
    pub metrics_per_sec: f64,
    pub uptime_secs: f64,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    latest: ProcessorStats,
    latency_hist: Option<Histogram<u64>>,
    start_time: Instant,
}

// ─── StatsRegistry impl ──────────────────────────────────────────

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest: ProcessorStats::default(),
                latency_hist: Histogram::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG).ok(),
                start_time: Instant::now(),
            }),
        }
    }

    /// Read-only copy for the debug endpoint.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        let uptime_secs = inner.start_time.elapsed().as_secs_f64();
        let metrics_per_sec = if uptime_secs > 0.0 {
            inner.latest.processed_count as f64 / uptime_secs
        } else {
            0.0
        };

        StatsSnapshot {
            n_metrics: inner.latest.processed_count,
            n_errors: inner.latest.error_count,
            avg_count: inner.latest.avg_count,
            avg_process_time: inner.latest.avg_latency_secs,
            latency: inner
                .latency_hist
                .as_ref()
                .map(LatencyPercentiles::from_histogram)
                .unwrap_or_default(),
            metrics_per_sec,
            uptime_secs,
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for StatsRegistry {
    fn publish(&self, stats: &ProcessorStats, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.latest = *stats;
        if let Some(hist) = inner.latency_hist.as_mut() {
            // Clamp to ≥ 1 μs; out-of-range samples are dropped
            let us = (latency.as_micros() as u64).max(1);
            let _ = hist.record(us);
        }
    }
}
