use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use crate::error::{ProcessError, StoreError};
use crate::queue::MetricEvent;
use crate::store::FrequencyStore;
use crate::worker::Processor;

/// Key prefix shared by daily and monthly buckets.
pub const NAMESPACE: &str = "metrics:dn";

/// Daily bucket key, `metrics:dn:<month>:<day>`.
pub fn daily_key(month: u32, day: u32) -> String {
    format!("{NAMESPACE}:{month}:{day}")
}

/// Monthly bucket key, `metrics:dn:<month>`.
pub fn monthly_key(month: u32) -> String {
    format!("{NAMESPACE}:{month}")
}

/// Counts how often each distinct metric name shows up per day.
///
/// Daily buckets are folded into monthly ones by
/// [`super::consolidation::consolidate`], which runs on its own schedule
/// against the same store.
pub struct FrequencyAggregator {
    store: Arc<dyn FrequencyStore>,
}

impl FrequencyAggregator {
    pub fn new(store: Arc<dyn FrequencyStore>) -> Self {
        Self { store }
    }

    /// Bumps `event.metric` by one in the bucket for `date`.
    pub async fn insert(&self, date: NaiveDate, event: &MetricEvent) -> Result<f64, StoreError> {
        let key = daily_key(date.month(), date.day());
        self.store.increment(&key, &event.metric, 1.0).await
    }
}

#[async_trait]
impl Processor for FrequencyAggregator {
    async fn process(&self, event: &MetricEvent) -> Result<(), ProcessError> {
        self.insert(Utc::now().date_naive(), event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn key_layout() {
        assert_eq!(daily_key(2, 29), "metrics:dn:2:29");
        assert_eq!(monthly_key(12), "metrics:dn:12");
    }

    #[tokio::test]
    async fn same_day_increments_accumulate() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = FrequencyAggregator::new(store.clone());

        aggregator.process(&MetricEvent::new("user1", 5, "metric1")).await.unwrap();
        aggregator.process(&MetricEvent::new("user1", 1, "metric1")).await.unwrap();
        aggregator.process(&MetricEvent::new("user1", 7, "metric2")).await.unwrap();

        let today = Utc::now().date_naive();
        let scores = store
            .scores(&daily_key(today.month(), today.day()))
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores["metric1"], 2.0);
        assert_eq!(scores["metric2"], 1.0);
    }

    #[tokio::test]
    async fn days_are_separate_buckets() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = FrequencyAggregator::new(store.clone());
        let event = MetricEvent::new("u", 1, "m");

        let day = NaiveDate::from_ymd_opt(2016, 2, 28).unwrap();
        aggregator.insert(day, &event).await.unwrap();
        aggregator.insert(day.succ_opt().unwrap(), &event).await.unwrap();

        assert_eq!(store.keys(), vec!["metrics:dn:2:28", "metrics:dn:2:29"]);
    }
}
