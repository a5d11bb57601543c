//! Narrow contracts for the three backing stores.
//!
//! Processors only talk to these traits; [`RedisStore`] is the production
//! backend and [`MemoryStore`] mirrors its semantics for tests.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::queue::MetricEvent;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Frequency table keyed by member name (sorted-set semantics).
pub type Scores = HashMap<String, f64>;

/// Sorted-set style frequency tables.
#[async_trait]
pub trait FrequencyStore: Send + Sync {
    /// Adds `by` to `member` in `key`, creating either if absent.
    /// Returns the new score.
    async fn increment(&self, key: &str, member: &str, by: f64) -> Result<f64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Stores the element-wise sum of `sources` into `dest`, replacing it.
    /// Missing sources count as empty; an empty result leaves `dest` absent.
    /// Returns the number of members in `dest`.
    async fn union_sum(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError>;

    /// Removes `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Every member of `key` with its score. Empty when `key` is absent.
    async fn scores(&self, key: &str) -> Result<Scores, StoreError>;
}

/// One stored event-log entry: the event plus its arrival time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: MetricEvent,
    pub time: DateTime<Utc>,
}

/// Append-only event log whose entries the store expires after an hour.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn append(&self, record: &EventRecord) -> Result<(), StoreError>;
}

/// One row per username, holding the first time it was seen.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts `username` unless already present. Returns `true` when inserted.
    async fn insert_if_absent(
        &self,
        username: &str,
        first_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
