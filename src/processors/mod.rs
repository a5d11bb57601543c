pub mod account;
pub mod consolidation;
pub mod event_log;
pub mod frequency;

use std::sync::Arc;

use clap::ValueEnum;

use crate::queue::{ACCOUNT_NAME_QUEUE, DISTINCT_NAME_QUEUE, HOURLY_LOG_QUEUE};
use crate::store::RedisStore;
use crate::worker::Processor;

pub use account::AccountDirectory;
pub use consolidation::{consolidate, spawn_consolidation, Consolidation};
pub use event_log::EventLog;
pub use frequency::FrequencyAggregator;

/// The worker kinds this binary can run, one per bound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessorKind {
    /// Last hour of raw events
    #[value(name = "hourlylog")]
    HourlyLog,
    /// Daily and monthly distinct metric name counts
    #[value(name = "distinctname")]
    DistinctName,
    /// First-seen time per account name
    #[value(name = "accountname")]
    AccountName,
}

impl ProcessorKind {
    /// Queue this kind of worker consumes.
    pub fn queue(self) -> &'static str {
        match self {
            Self::HourlyLog => HOURLY_LOG_QUEUE,
            Self::DistinctName => DISTINCT_NAME_QUEUE,
            Self::AccountName => ACCOUNT_NAME_QUEUE,
        }
    }

    /// Builds the processor for this kind on top of `store`.
    pub fn build(self, store: Arc<RedisStore>) -> Arc<dyn Processor> {
        match self {
            Self::HourlyLog => Arc::new(EventLog::new(store)),
            Self::DistinctName => Arc::new(FrequencyAggregator::new(store)),
            Self::AccountName => Arc::new(AccountDirectory::new(store)),
        }
    }
}
