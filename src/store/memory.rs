use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{AccountStore, EventLogStore, EventRecord, FrequencyStore, Scores};
use crate::error::StoreError;

/// In-process stand-in for [`super::RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_deletes: AtomicBool,
}

#[derive(Default)]
struct Inner {
    sets: HashMap<String, Scores>,
    events: Vec<EventRecord>,
    accounts: HashMap<String, DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `delete` call fail until switched off again.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.inner.lock().events.clone()
    }

    pub fn accounts(&self) -> HashMap<String, DateTime<Utc>> {
        self.inner.lock().accounts.clone()
    }

    /// Keys of every frequency table currently stored.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().sets.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl FrequencyStore for MemoryStore {
    async fn increment(&self, key: &str, member: &str, by: f64) -> Result<f64, StoreError> {
        let mut inner = self.inner.lock();
        let score = inner
            .sets
            .entry(key.to_owned())
            .or_default()
            .entry(member.to_owned())
            .or_insert(0.0);
        *score += by;
        Ok(*score)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().sets.contains_key(key))
    }

    async fn union_sum(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let mut total = Scores::new();
        for set in sources.iter().filter_map(|k| inner.sets.get(k)) {
            for (member, score) in set {
                *total.entry(member.clone()).or_insert(0.0) += score;
            }
        }

        let members = total.len() as u64;
        if total.is_empty() {
            inner.sets.remove(dest);
        } else {
            inner.sets.insert(dest.to_owned(), total);
        }
        Ok(members)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delete rejected".into()));
        }
        let mut inner = self.inner.lock();
        let removed = keys
            .iter()
            .filter(|k| inner.sets.remove(k.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn scores(&self, key: &str) -> Result<Scores, StoreError> {
        Ok(self.inner.lock().sets.get(key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EventLogStore for MemoryStore {
    async fn append(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.inner.lock().events.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_if_absent(
        &self,
        username: &str,
        first_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(username) {
            return Ok(false);
        }
        inner.accounts.insert(username.to_owned(), first_seen);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_creates_then_adds() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("k", "a", 1.0).await.unwrap(), 1.0);
        assert_eq!(store.increment("k", "a", 1.0).await.unwrap(), 2.0);
        assert!(store.exists("k").await.unwrap());
        assert!(!store.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn union_of_missing_sources_leaves_dest_absent() {
        let store = MemoryStore::new();
        let sources = vec!["x".to_string(), "y".to_string()];
        assert_eq!(store.union_sum("dest", &sources).await.unwrap(), 0);
        assert!(!store.exists("dest").await.unwrap());
    }

    #[tokio::test]
    async fn delete_counts_existing_keys() {
        let store = MemoryStore::new();
        store.increment("a", "m", 1.0).await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.delete(&keys).await.unwrap(), 1);

        store.increment("a", "m", 1.0).await.unwrap();
        store.set_fail_deletes(true);
        assert!(store.delete(&keys).await.is_err());
        assert!(store.exists("a").await.unwrap());
    }
}
