//! Fans metric events from a RabbitMQ fanout exchange out to independent
//! workers, each persisting them into its own store.

use std::sync::Arc;

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod processors;
pub mod queue;
pub mod server;
pub mod store;
pub mod worker;

/// Shared state handed to the debug HTTP handlers via `State<Arc<AppState>>`.
pub struct AppState {
    /// Latest counters pushed by the stats decorator.
    pub stats: Arc<metrics::StatsRegistry>,
}
