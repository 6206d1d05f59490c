//! Query cache
//!
//! In-memory memoization of aggregated views keyed by
//! `(timeframe, specific day for daily queries)`. Entries are populated
//! lazily on first access and dropped all at once on invalidation; there is
//! no per-entry expiry.
//!
//! The single-day path materializes missing days synchronously through the
//! rollup service (this is how "today" is served). Wider timeframes only sum
//! daily-stats rows that already exist: missing days are skipped, not
//! backfilled, so wide views are as fresh as the last backfill and cost one
//! bounded scan. Anyone who needs wide views fresh invalidates after running
//! the backfill, which is exactly what the scheduler does.

use crate::db::Database;
use crate::error::Result;
use crate::rollup::RollupService;
use crate::segments::{
    self, BucketGranularity, ContextKeypresses, ContextUsage, HistogramBucket,
};
use crate::types::{day_start, next_day_start, DailyStats, Timeframe};
use chrono::{Duration, Local, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Cache key: timeframe plus the specific day for daily queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    timeframe: Timeframe,
    day: Option<NaiveDate>,
}

/// Aggregated view of a timeframe: the shape handed to presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStats {
    /// Total active time in seconds across the range
    pub total_active_secs: i64,
    /// Total attributed keypresses across the range
    pub total_keypresses: i64,
    /// Ranked usage list, duration descending
    pub usages: Vec<ContextUsage>,
    /// Ranked keypress list, count descending
    pub keypresses: Vec<ContextKeypresses>,
    /// Keypress histogram: per-minute buckets for daily queries, per-day
    /// buckets for wider timeframes
    pub histogram: Vec<HistogramBucket>,
}

/// Memoizing front for range/granularity queries.
pub struct StatsCache {
    db: Arc<Database>,
    rollup: Arc<RollupService>,
    entries: Mutex<HashMap<CacheKey, Arc<AggregateStats>>>,
}

impl StatsCache {
    pub fn new(db: Arc<Database>, rollup: Arc<RollupService>) -> Self {
        Self {
            db,
            rollup,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Aggregated stats for `timeframe`.
    ///
    /// For [`Timeframe::Day`], `day` selects the calendar day (default:
    /// today); it is ignored for wider timeframes.
    pub fn stats(&self, timeframe: Timeframe, day: Option<NaiveDate>) -> Result<Arc<AggregateStats>> {
        let key = match timeframe {
            Timeframe::Day => CacheKey {
                timeframe,
                day: Some(day.unwrap_or_else(|| Local::now().date_naive())),
            },
            _ => CacheKey {
                timeframe,
                day: None,
            },
        };

        if let Some(hit) = self.entries.lock().unwrap().get(&key) {
            tracing::debug!(timeframe = %key.timeframe, "Query cache hit");
            return Ok(Arc::clone(hit));
        }

        let stats = match key.timeframe {
            Timeframe::Day => self.build_day(key.day.unwrap_or_else(|| Local::now().date_naive()))?,
            _ => self.build_range(key.timeframe)?,
        };

        let stats = Arc::new(stats);
        self.entries
            .lock()
            .unwrap()
            .insert(key, Arc::clone(&stats));
        Ok(stats)
    }

    /// Drop every cached entry.
    ///
    /// Called on explicit refresh and whenever the event store is known to
    /// have changed (e.g. after the scheduler's backfill).
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(dropped, "Query cache invalidated");
    }

    /// Single-day view: materialize the day on demand, then read the
    /// precomputed rollups. The minute histogram comes from the raw
    /// keypress events of the day.
    fn build_day(&self, date: NaiveDate) -> Result<AggregateStats> {
        let stats = match self.db.get_daily_stats(date)? {
            Some(stats) => stats,
            None => self.rollup.compute_stats_for_date(date)?,
        };

        let keypresses = self
            .db
            .keypresses_in(day_start(date), next_day_start(date))?;
        let histogram = segments::keypress_histogram(&keypresses, BucketGranularity::Minute);

        Ok(AggregateStats {
            total_active_secs: stats.total_active_secs,
            total_keypresses: stats.total_keypresses,
            usages: stats
                .app_usages
                .iter()
                .map(|u| ContextUsage {
                    context_label: u.context_label.clone(),
                    duration_secs: u.duration_secs,
                })
                .collect(),
            keypresses: stats
                .keypress_segments
                .iter()
                .map(|s| ContextKeypresses {
                    context_label: s.context_label.clone(),
                    count: s.count,
                })
                .collect(),
            histogram,
        })
    }

    /// Wide view: sum already-materialized daily rows over the range.
    fn build_range(&self, timeframe: Timeframe) -> Result<AggregateStats> {
        let today = Local::now().date_naive();
        let from = match timeframe.trailing_days() {
            Some(days) => today - Duration::days(days - 1),
            // AllTime: from the earliest computed day; no rows means an
            // empty aggregate either way
            None => self.db.earliest_daily_stats_date()?.unwrap_or(today),
        };

        let rows = self.db.daily_stats_in(from, today)?;
        Ok(Self::aggregate_rows(&rows))
    }

    fn aggregate_rows(rows: &[DailyStats]) -> AggregateStats {
        let mut durations: BTreeMap<&str, i64> = BTreeMap::new();
        let mut usage_keypresses: BTreeMap<&str, i64> = BTreeMap::new();
        let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
        let mut total_active_secs = 0i64;
        let mut total_keypresses = 0i64;
        let mut histogram = Vec::with_capacity(rows.len());

        for row in rows {
            total_active_secs += row.total_active_secs;
            total_keypresses += row.total_keypresses;
            for usage in &row.app_usages {
                *durations.entry(usage.context_label.as_str()).or_insert(0) +=
                    usage.duration_secs;
                *usage_keypresses
                    .entry(usage.context_label.as_str())
                    .or_insert(0) += usage.keypresses;
            }
            for segment in &row.keypress_segments {
                *counts.entry(segment.context_label.as_str()).or_insert(0) += segment.count;
            }
            histogram.push(HistogramBucket {
                bucket_start: day_start(row.date),
                count: row.total_keypresses,
            });
        }

        let mut usages: Vec<ContextUsage> = durations
            .into_iter()
            .map(|(label, secs)| ContextUsage {
                context_label: label.to_string(),
                duration_secs: secs,
            })
            .collect();
        usages.sort_by(|a, b| {
            b.duration_secs
                .cmp(&a.duration_secs)
                .then_with(|| a.context_label.cmp(&b.context_label))
        });

        let mut keypresses: Vec<ContextKeypresses> = counts
            .into_iter()
            .map(|(label, count)| ContextKeypresses {
                context_label: label.to_string(),
                count,
            })
            .collect();
        keypresses.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.context_label.cmp(&b.context_label))
        });

        AggregateStats {
            total_active_secs,
            total_keypresses,
            usages,
            keypresses,
            histogram,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivationEvent, KeypressEvent};
    use chrono::{DateTime, Utc};

    fn test_cache() -> (Arc<Database>, Arc<RollupService>, StatsCache) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let rollup = Arc::new(RollupService::new(Arc::clone(&db)));
        let cache = StatsCache::new(Arc::clone(&db), Arc::clone(&rollup));
        (db, rollup, cache)
    }

    fn past_day_at(days_ago: i64, hour: u32, min: u32) -> DateTime<Utc> {
        let date = Local::now().date_naive() - Duration::days(days_ago);
        crate::types::resolve_local(date.and_hms_opt(hour, min, 0).unwrap())
    }

    fn past_date(days_ago: i64) -> NaiveDate {
        Local::now().date_naive() - Duration::days(days_ago)
    }

    fn seed_day(db: &Database, days_ago: i64) {
        db.append_activation(&ActivationEvent {
            timestamp: past_day_at(days_ago, 9, 0),
            context_label: "editor".to_string(),
        })
        .unwrap();
        db.append_keypress(&KeypressEvent {
            timestamp: past_day_at(days_ago, 9, 30),
            key_code: 36,
        })
        .unwrap();
    }

    #[test]
    fn test_day_query_materializes_lazily() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 1);

        let date = past_date(1);
        assert!(!rollup.has_computed_stats(date).unwrap());

        let stats = cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(stats.total_keypresses, 1);
        assert_eq!(rollup.computations_run(), 1);
        assert!(rollup.has_computed_stats(date).unwrap());

        // Second access is a cache hit: no recomputation
        let again = cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(rollup.computations_run(), 1);
        assert_eq!(*again, *stats);
    }

    #[test]
    fn test_day_query_reads_precomputed_without_recompute() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 1);

        let date = past_date(1);
        rollup.compute_stats_for_date(date).unwrap();
        assert_eq!(rollup.computations_run(), 1);

        let stats = cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(stats.total_keypresses, 1);
        // Precomputed row was read directly
        assert_eq!(rollup.computations_run(), 1);
    }

    #[test]
    fn test_day_histogram_has_minute_buckets() {
        let (db, _rollup, cache) = test_cache();
        seed_day(db.as_ref(), 1);
        db.append_keypress(&KeypressEvent {
            timestamp: past_day_at(1, 9, 31),
            key_code: 36,
        })
        .unwrap();

        let stats = cache.stats(Timeframe::Day, Some(past_date(1))).unwrap();
        assert_eq!(stats.histogram.len(), 2);
        assert!(stats.histogram[0].bucket_start < stats.histogram[1].bucket_start);
        assert_eq!(
            stats.histogram[1].bucket_start - stats.histogram[0].bucket_start,
            Duration::seconds(60)
        );
    }

    #[test]
    fn test_wide_query_skips_missing_days() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 1);
        seed_day(cache.db.as_ref(), 3);

        // Only d-1 is materialized; d-3 has raw events but no daily row
        rollup.compute_stats_for_date(past_date(1)).unwrap();
        let before = rollup.computations_run();

        let stats = cache.stats(Timeframe::Week, None).unwrap();
        // d-3 is skipped, not backfilled by the query path
        assert_eq!(rollup.computations_run(), before);
        assert_eq!(stats.total_keypresses, 1);
        assert_eq!(stats.histogram.len(), 1);
        assert_eq!(stats.histogram[0].bucket_start, day_start(past_date(1)));
    }

    #[test]
    fn test_wide_query_sums_across_days() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 1);
        seed_day(cache.db.as_ref(), 2);
        rollup.compute_missing_stats().unwrap();

        let stats = cache.stats(Timeframe::Week, None).unwrap();
        assert_eq!(stats.total_keypresses, 2);

        let editor = stats
            .usages
            .iter()
            .find(|u| u.context_label == "editor")
            .unwrap();
        // editor accrues [9:00, 23:59:59] on both days
        let per_day = (crate::types::day_end(past_date(1)) - past_day_at(1, 9, 0)).num_seconds();
        assert_eq!(editor.duration_secs, 2 * per_day);

        let editor_keys = stats
            .keypresses
            .iter()
            .find(|k| k.context_label == "editor")
            .unwrap();
        assert_eq!(editor_keys.count, 2);
    }

    #[test]
    fn test_all_time_spans_earliest_day() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 400);
        seed_day(cache.db.as_ref(), 1);
        rollup.compute_stats_for_date(past_date(400)).unwrap();
        rollup.compute_stats_for_date(past_date(1)).unwrap();

        // Year misses the 400-day-old row; AllTime includes it
        let year = cache.stats(Timeframe::Year, None).unwrap();
        assert_eq!(year.total_keypresses, 1);
        let all = cache.stats(Timeframe::AllTime, None).unwrap();
        assert_eq!(all.total_keypresses, 2);
    }

    #[test]
    fn test_invalidate_forces_recomputation_of_day_entries() {
        let (db, rollup, cache) = test_cache();
        seed_day(db.as_ref(), 1);

        let date = past_date(1);
        cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(rollup.computations_run(), 1);

        // New events arrive; the cached entry is now stale
        db.append_keypress(&KeypressEvent {
            timestamp: past_day_at(1, 11, 0),
            key_code: 36,
        })
        .unwrap();
        let stale = cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(stale.total_keypresses, 1, "served from cache until refresh");

        cache.invalidate_all();
        // The daily row still exists, so the rebuilt entry reads it; a full
        // refresh recomputes the day first
        rollup.compute_stats_for_date(date).unwrap();
        let fresh = cache.stats(Timeframe::Day, Some(date)).unwrap();
        assert_eq!(fresh.total_keypresses, 2);
    }

    #[test]
    fn test_wide_entry_rebuilt_after_invalidate() {
        let (_db, rollup, cache) = test_cache();
        seed_day(cache.db.as_ref(), 2);
        rollup.compute_missing_stats().unwrap();

        let first = cache.stats(Timeframe::Month, None).unwrap();
        assert_eq!(first.total_keypresses, 1);

        seed_day(cache.db.as_ref(), 1);
        rollup.compute_missing_stats().unwrap();

        // Cached until invalidated
        let cached = cache.stats(Timeframe::Month, None).unwrap();
        assert_eq!(cached.total_keypresses, 1);

        cache.invalidate_all();
        let fresh = cache.stats(Timeframe::Month, None).unwrap();
        assert_eq!(fresh.total_keypresses, 2);
    }
}
