//! Midnight backfill scheduler
//!
//! Drives the rollup service on a day-boundary timer, independently of
//! queries. Each cycle: compute yesterday, close any historical gaps, then
//! invalidate the query cache so the next query sees the fresh rows.
//!
//! The delay is recomputed from the wall clock every cycle rather than
//! assumed to be a fixed 24 hours: across a daylight-saving transition a
//! local day is 23 or 25 hours long, and a fixed interval would drift off
//! the midnight boundary.

use crate::cache::StatsCache;
use crate::rollup::RollupService;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use std::sync::Arc;

/// Time until the next local midnight, measured from `now`.
pub fn duration_until_next_local_midnight(now: DateTime<Local>) -> std::time::Duration {
    let next_day = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    let naive_midnight = next_day.and_time(NaiveTime::MIN);
    let midnight = Local
        .from_local_datetime(&naive_midnight)
        .earliest()
        .unwrap_or(now + Duration::hours(24));
    (midnight - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
        .max(std::time::Duration::from_secs(1))
}

/// Day-boundary timer that keeps daily stats current.
pub struct Scheduler {
    rollup: Arc<RollupService>,
    cache: Arc<StatsCache>,
}

impl Scheduler {
    pub fn new(rollup: Arc<RollupService>, cache: Arc<StatsCache>) -> Self {
        Self { rollup, cache }
    }

    /// Run the scheduling loop forever.
    ///
    /// A failed cycle is logged and the loop reschedules for the next
    /// midnight; failures never tear the scheduler down.
    pub async fn run(self) {
        loop {
            let delay = duration_until_next_local_midnight(Local::now());
            tracing::info!(delay_secs = delay.as_secs(), "Scheduler sleeping until next local midnight");
            tokio::time::sleep(delay).await;
            self.run_cycle().await;
        }
    }

    /// One firing: compute yesterday, backfill gaps, invalidate the cache.
    pub async fn run_cycle(&self) {
        let rollup = Arc::clone(&self.rollup);
        let outcome = tokio::task::spawn_blocking(move || {
            let yesterday = Local::now()
                .date_naive()
                .pred_opt()
                .unwrap_or_else(|| Local::now().date_naive());
            rollup.compute_stats_for_date(yesterday)?;
            rollup.compute_missing_stats()
        })
        .await;

        match outcome {
            Ok(Ok(backfilled)) => {
                tracing::info!(backfilled, "Midnight rollup cycle complete");
                self.cache.invalidate_all();
            }
            Ok(Err(e)) => {
                tracing::error!(kind = e.kind(), error = %e, "Midnight rollup cycle failed");
                // Yesterday may still have been written before the failure
                self.cache.invalidate_all();
            }
            Err(e) => {
                tracing::error!(error = %e, "Midnight rollup task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_positive_and_bounded() {
        let delay = duration_until_next_local_midnight(Local::now());
        assert!(delay >= std::time::Duration::from_secs(1));
        // Never more than a 25-hour local day
        assert!(delay <= std::time::Duration::from_secs(25 * 3600));
    }

    #[test]
    fn test_delay_shrinks_toward_midnight() {
        let now = Local::now();
        let later = now + Duration::minutes(5);
        // Unless the 5 minutes cross midnight, the later instant is closer
        if now.date_naive() == later.date_naive() {
            assert!(
                duration_until_next_local_midnight(later)
                    < duration_until_next_local_midnight(now)
            );
        }
    }

    #[test]
    fn test_delay_lands_on_midnight() {
        let now = Local::now();
        let delay = duration_until_next_local_midnight(now);
        let arrival = now + Duration::from_std(delay).unwrap();
        assert_eq!(arrival.time(), NaiveTime::MIN);
        assert_eq!(arrival.date_naive(), now.date_naive().succ_opt().unwrap());
    }
}
