use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::error;

use crate::error::ProcessError;
use crate::queue::MetricEvent;
use crate::store::{EventLogStore, EventRecord};
use crate::worker::Processor;

/// Keeps every event of the last hour. Expiry is left to the store.
pub struct EventLog {
    store: Arc<dyn EventLogStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Processor for EventLog {
    async fn process(&self, event: &MetricEvent) -> Result<(), ProcessError> {
        let record = EventRecord {
            event: event.clone(),
            time: Utc::now(),
        };
        self.store.append(&record).await.map_err(|e| {
            error!(error = %e, "error storing event");
            ProcessError::from(e)
        })
    }
}
