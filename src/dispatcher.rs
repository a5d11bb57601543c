//! Synthetic producer: publishes random metrics to the exchange.
//! Only meant for exercising the workers; real events come from elsewhere.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::RetriesExhausted;
use crate::queue::{Channel, MetricEvent, EXCHANGE};

// ─── Constants ───────────────────────────────────────────────────

/// First wait after a failed publish.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
/// Failed attempts tolerated for a single event before giving up.
pub const MAX_PUBLISH_RETRIES: u32 = 6;

const PROGRESS_EVERY: u64 = 10_000;

// ─── Name pools ──────────────────────────────────────────────────

static USERNAMES: &[&str] = &[
    "emma", "liam", "olivia", "noah", "ava", "ethan", "sophia", "mason", "isabella", "william",
    "mia", "james",
];

static ADJ: &[&str] = &[
    "wireless", "smart", "compact", "portable", "digital", "classic", "turbo", "nano",
];

static NOUN: &[&str] = &[
    "keyboard", "monitor", "speaker", "camera", "tablet", "router", "drive", "sensor",
];

// ─── Event generation ────────────────────────────────────────────

/// Random username, non-negative count and `<adj>_<noun>` metric name.
pub fn random_event(rng: &mut StdRng) -> MetricEvent {
    let username = USERNAMES[rng.gen_range(0..USERNAMES.len())];
    let metric = format!(
        "{}_{}",
        ADJ[rng.gen_range(0..ADJ.len())],
        NOUN[rng.gen_range(0..NOUN.len())],
    );
    MetricEvent::new(username, rng.gen_range(0..=i64::MAX), metric)
}

/// Publishes `event`, retrying transient failures with `backoff`.
/// The backoff is reset after a successful publish.
pub async fn publish_with_retry(
    channel: &dyn Channel,
    exchange: &str,
    event: &MetricEvent,
    backoff: &mut ExponentialBackoff,
) -> Result<(), RetriesExhausted> {
    loop {
        match channel.publish_metric(exchange, event).await {
            Ok(()) => {
                backoff.reset();
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, attempt = backoff.attempts() + 1, "publish failed");
                backoff.wait().await?;
            }
        }
    }
}

// ─── Public entry point ──────────────────────────────────────────

/// Publishes `count` random events (forever when `None`) to [`EXCHANGE`].
/// Returns how many were sent; fails once one event exhausts its retries.
pub async fn run(
    channel: &dyn Channel,
    rng: &mut StdRng,
    count: Option<u64>,
) -> Result<u64, RetriesExhausted> {
    let mut backoff = ExponentialBackoff::new(RETRY_BASE_DELAY, MAX_PUBLISH_RETRIES);
    let mut sent = 0u64;

    while count.map_or(true, |n| sent < n) {
        let event = random_event(rng);
        publish_with_retry(channel, EXCHANGE, &event, &mut backoff).await?;
        debug!(?event, "published");

        sent += 1;
        if sent % PROGRESS_EVERY == 0 {
            info!(sent, "dispatching");
        }
    }
    Ok(sent)
}
