//! Distinct-name pipeline: events through the engine into daily buckets,
//! then the monthly roll-up.

use std::sync::Arc;

use chrono::NaiveDate;

use metric_collector::processors::frequency::{daily_key, monthly_key};
use metric_collector::processors::{consolidate, Consolidation, FrequencyAggregator};
use metric_collector::queue::{declare_topology, Channel, MemoryChannel, MetricEvent};
use metric_collector::queue::{DISTINCT_NAME_QUEUE, EXCHANGE};
use metric_collector::store::{FrequencyStore, MemoryStore};
use metric_collector::worker::{run_worker, WorkerConfig};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[tokio::test]
async fn leap_february_is_folded_into_one_bucket() {
    let store = MemoryStore::new();

    // metric1 seen once per day, metric2 twice on the 29th only
    for day in 1..=29 {
        store.increment(&daily_key(2, day), "metric1", 1.0).await.unwrap();
    }
    store.increment(&daily_key(2, 29), "metric2", 2.0).await.unwrap();

    let today = date(2016, 3, 14);
    let outcome = consolidate(&store, today).await.unwrap();
    assert_eq!(
        outcome,
        Consolidation::Consolidated {
            year: 2016,
            month: 2,
            members: 2,
            deleted: Some(29),
        }
    );

    let monthly = store.scores(&monthly_key(2)).await.unwrap();
    assert_eq!(monthly["metric1"], 29.0);
    assert_eq!(monthly["metric2"], 2.0);
    assert_eq!(store.keys(), vec![monthly_key(2)]);

    // Second pass is a no-op and leaves the totals alone
    assert_eq!(
        consolidate(&store, today).await.unwrap(),
        Consolidation::AlreadyConsolidated { month: 2 }
    );
    assert_eq!(store.scores(&monthly_key(2)).await.unwrap(), monthly);
}

#[tokio::test]
async fn non_leap_february_skips_the_29th() {
    let store = MemoryStore::new();
    for day in [1, 28, 29] {
        store.increment(&daily_key(2, day), "m", 1.0).await.unwrap();
    }

    consolidate(&store, date(2015, 3, 1)).await.unwrap();

    assert_eq!(store.scores(&monthly_key(2)).await.unwrap()["m"], 2.0);
    // Not part of a 28 day February
    assert!(store.exists(&daily_key(2, 29)).await.unwrap());
    assert!(!store.exists(&daily_key(2, 28)).await.unwrap());
}

#[tokio::test]
async fn december_is_consolidated_in_january() {
    let store = MemoryStore::new();
    store.increment(&daily_key(12, 31), "m", 4.0).await.unwrap();

    let outcome = consolidate(&store, date(2017, 1, 1)).await.unwrap();
    assert!(matches!(
        outcome,
        Consolidation::Consolidated { year: 2016, month: 12, members: 1, .. }
    ));
    assert_eq!(store.scores(&monthly_key(12)).await.unwrap()["m"], 4.0);
}

#[tokio::test]
async fn engine_feeds_daily_buckets() {
    let channel = MemoryChannel::new();
    declare_topology(&channel, false).await.unwrap();

    for metric in ["a", "b", "a", "a"] {
        channel
            .publish_metric(EXCHANGE, &MetricEvent::new("user", 1, metric))
            .await
            .unwrap();
    }
    channel.close().await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let config = WorkerConfig {
        max_in_flight: 1,
        ..WorkerConfig::default()
    };
    run_worker(
        &channel,
        DISTINCT_NAME_QUEUE,
        Arc::new(FrequencyAggregator::new(store.clone())),
        config,
    )
    .await;

    // Last task may still be finishing after the stream ended
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while channel.delivery_stats(DISTINCT_NAME_QUEUE).unwrap().acked < 4 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let keys = store.keys();
    assert_eq!(keys.len(), 1);
    let scores = store.scores(&keys[0]).await.unwrap();
    assert_eq!(scores["a"], 3.0);
    assert_eq!(scores["b"], 1.0);
}
