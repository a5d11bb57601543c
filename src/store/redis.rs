use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{AccountStore, EventLogStore, EventRecord, FrequencyStore, Scores};
use crate::error::StoreError;

// ─── Key layout ──────────────────────────────────────────────────

/// Prefix of every event-log entry (`metrics:hl:<millis>:<id>`).
pub const EVENT_LOG_PREFIX: &str = "metrics:hl";

/// Hash holding one field per username.
pub const ACCOUNTS_KEY: &str = "metrics:accounts";

/// Lifetime of an event-log entry.
pub const EVENT_LOG_TTL: Duration = Duration::from_secs(60 * 60);

/// All three stores on top of one Redis connection.
///
/// `ConnectionManager` is cheaply cloneable and reconnects on failure; every
/// call works on its own clone of the shared multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Opens a `ConnectionManager` to `url` and pings it.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl FrequencyStore for RedisStore {
    async fn increment(&self, key: &str, member: &str, by: f64) -> Result<f64, StoreError> {
        let mut conn = self.conn.clone();
        let score: f64 = conn.zincr(key, member, by).await?;
        Ok(score)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn union_sum(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError> {
        if sources.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let members: u64 = redis::cmd("ZUNIONSTORE")
            .arg(dest)
            .arg(sources.len())
            .arg(sources)
            .arg("AGGREGATE")
            .arg("SUM")
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn scores(&self, key: &str) -> Result<Scores, StoreError> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;
        Ok(pairs.into_iter().collect())
    }
}

#[async_trait]
impl EventLogStore for RedisStore {
    async fn append(&self, record: &EventRecord) -> Result<(), StoreError> {
        let key = format!(
            "{EVENT_LOG_PREFIX}:{}:{}",
            record.time.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..12],
        );
        let json = serde_json::to_string(record)?;

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("EX")
            .arg(EVENT_LOG_TTL.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for RedisStore {
    async fn insert_if_absent(
        &self,
        username: &str,
        first_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let inserted: bool = conn
            .hset_nx(ACCOUNTS_KEY, username, first_seen.to_rfc3339())
            .await?;
        Ok(inserted)
    }
}
