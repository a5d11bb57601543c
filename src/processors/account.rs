use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

use crate::error::ProcessError;
use crate::queue::MetricEvent;
use crate::store::AccountStore;
use crate::worker::Processor;

/// Every username that ever sent a metric, with when it was first seen (UTC).
pub struct AccountDirectory {
    store: Arc<dyn AccountStore>,
}

impl AccountDirectory {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Processor for AccountDirectory {
    async fn process(&self, event: &MetricEvent) -> Result<(), ProcessError> {
        match self.store.insert_if_absent(&event.username, Utc::now()).await {
            Ok(true) => {
                debug!(username = %event.username, "new account");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                error!(error = %e, "error inserting account");
                Err(e.into())
            }
        }
    }
}
