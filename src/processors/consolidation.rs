//! Monthly roll-up of the frequency aggregator's daily buckets.
//!
//! The existence check on the monthly bucket is the only guard against
//! consolidating a month twice, so any trigger cadence is safe. It is not
//! transactional: two processes racing the same check may both run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::frequency::{daily_key, monthly_key};
use crate::error::StoreError;
use crate::store::FrequencyStore;

/// What a consolidation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consolidation {
    /// The monthly bucket already existed; nothing was touched.
    AlreadyConsolidated { month: u32 },
    Consolidated {
        year: i32,
        month: u32,
        /// Members in the new monthly bucket
        members: u64,
        /// Daily buckets removed, `None` if cleanup failed
        deleted: Option<u64>,
    },
}

// ─── Calendar ────────────────────────────────────────────────────

/// Gregorian rule: every 4th year, except centuries not divisible by 400.
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// `(year, month)` of the calendar month before the one `today` is in.
pub fn previous_month(today: NaiveDate) -> (i32, u32) {
    match today.month() {
        1 => (today.year() - 1, 12),
        m => (today.year(), m - 1),
    }
}

// ─── Consolidation ───────────────────────────────────────────────

/// Folds every daily bucket of the month before `today` into one monthly
/// bucket (sum per member), then deletes the daily buckets.
///
/// A failed cleanup is logged and reported through
/// [`Consolidation::Consolidated::deleted`]; the monthly bucket stays.
pub async fn consolidate(
    store: &dyn FrequencyStore,
    today: NaiveDate,
) -> Result<Consolidation, StoreError> {
    let (year, month) = previous_month(today);
    let monthly = monthly_key(month);

    info!(month, "checking past month consolidation status");
    if store.exists(&monthly).await? {
        info!(month, "consolidation was already done, nothing to do");
        return Ok(Consolidation::AlreadyConsolidated { month });
    }

    let days: Vec<String> = (1..=days_in(year, month))
        .map(|day| daily_key(month, day))
        .collect();

    info!(set = %monthly, "consolidating past month");
    debug!(?days, "daily sets");
    let members = store.union_sum(&monthly, &days).await?;

    info!(set = %monthly, members, "consolidation done, cleaning up");
    let deleted = match store.delete(&days).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "could not clean up daily data after consolidation");
            None
        }
    };

    Ok(Consolidation::Consolidated {
        year,
        month,
        members,
        deleted,
    })
}

/// Runs [`consolidate`] now and then every `every`, forever.
///
/// The cadence only decides how soon after a month rollover the previous
/// month gets folded; repeated passes are no-ops.
pub fn spawn_consolidation(store: Arc<dyn FrequencyStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "starting consolidation scheduler");
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            let today = Utc::now().date_naive();
            if let Err(e) = consolidate(store.as_ref(), today).await {
                error!(error = %e, "monthly consolidation failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn days_in_month() {
        let cases = [
            (2000, 2, 29),
            (2015, 2, 28),
            (2016, 2, 29),
            (1900, 2, 28),
            (2024, 1, 31),
            (2024, 3, 31),
            (2024, 4, 30),
            (2024, 6, 30),
            (2024, 9, 30),
            (2024, 11, 30),
            (2024, 12, 31),
        ];
        for (year, month, expected) in cases {
            assert_eq!(
                days_in(year, month),
                expected,
                "days in {month}/{year}"
            );
        }
    }

    #[test]
    fn previous_month_rolls_over_january() {
        let jan = NaiveDate::from_ymd_opt(2016, 1, 15).unwrap();
        assert_eq!(previous_month(jan), (2015, 12));
        let mar = NaiveDate::from_ymd_opt(2016, 3, 1).unwrap();
        assert_eq!(previous_month(mar), (2016, 2));
    }

    #[tokio::test]
    async fn missing_month_with_no_data_is_not_created() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2015, 3, 2).unwrap();
        let outcome = consolidate(&store, today).await.unwrap();
        assert_eq!(
            outcome,
            Consolidation::Consolidated {
                year: 2015,
                month: 2,
                members: 0,
                deleted: Some(0),
            }
        );
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn failed_cleanup_keeps_monthly_total() {
        let store = MemoryStore::new();
        store.increment(&daily_key(4, 5), "metric1", 3.0).await.unwrap();
        store.increment(&daily_key(4, 30), "metric1", 2.0).await.unwrap();
        store.set_fail_deletes(true);

        let today = NaiveDate::from_ymd_opt(2016, 5, 1).unwrap();
        let outcome = consolidate(&store, today).await.unwrap();
        assert!(matches!(
            outcome,
            Consolidation::Consolidated { members: 1, deleted: None, .. }
        ));
        assert_eq!(store.scores(&monthly_key(4)).await.unwrap()["metric1"], 5.0);
        // Stale daily data stays behind, the next pass must not double count
        store.set_fail_deletes(false);
        assert_eq!(
            consolidate(&store, today).await.unwrap(),
            Consolidation::AlreadyConsolidated { month: 4 }
        );
        assert_eq!(store.scores(&monthly_key(4)).await.unwrap()["metric1"], 5.0);
    }

    #[tokio::test]
    async fn current_month_is_left_alone() {
        let store = MemoryStore::new();
        store.increment(&daily_key(5, 1), "m", 1.0).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2016, 5, 20).unwrap();
        consolidate(&store, today).await.unwrap();
        assert_eq!(store.keys(), vec![daily_key(5, 1)]);
    }
}
