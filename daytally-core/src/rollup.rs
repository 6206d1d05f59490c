//! Daily rollup service
//!
//! Computes, stores, and idempotently rebuilds one [`DailyStats`] aggregate
//! per local calendar day from the raw event streams, via the segment
//! builder. Recomputation is full-replacement: the day's row is rebuilt
//! wholesale inside one transaction, never patched.
//!
//! Multiple triggers exist (midnight scheduler, user-initiated refresh, lazy
//! on-demand computation from a query), so recomputation holds a per-date
//! lock: at most one recomputation per date runs at a time, later triggers
//! for the same date wait their turn. Every attempt is recorded in the
//! computation-jobs table for diagnosability.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::segments;
use crate::types::{
    day_start, local_day, next_day_start, ActivationEvent, AppUsage, DailyStats, JobStatus,
    KeypressSegment,
};
use chrono::{Duration, Local, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Label assigned to carry-over time when no activation exists before the
/// window: the day started with something active that was never observed.
pub const UNKNOWN_ORIGIN_LABEL: &str = "unknown-origin";

/// Serializes recomputation per date.
///
/// `acquire` blocks while another holder has the same date and returns an
/// RAII guard that releases it on drop.
struct DateLock {
    in_flight: Mutex<HashSet<NaiveDate>>,
    released: Condvar,
}

impl DateLock {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    fn acquire(self: &Arc<Self>, date: NaiveDate) -> DateGuard {
        let mut held = self.in_flight.lock().unwrap();
        while held.contains(&date) {
            held = self.released.wait(held).unwrap();
        }
        held.insert(date);
        DateGuard {
            lock: Arc::clone(self),
            date,
        }
    }
}

struct DateGuard {
    lock: Arc<DateLock>,
    date: NaiveDate,
}

impl Drop for DateGuard {
    fn drop(&mut self) {
        let mut held = self.lock.in_flight.lock().unwrap();
        held.remove(&self.date);
        self.lock.released.notify_all();
    }
}

/// Service that owns daily-stats (re)computation and backfill.
pub struct RollupService {
    db: Arc<Database>,
    dates: Arc<DateLock>,
    computations: AtomicU64,
}

impl RollupService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            dates: Arc::new(DateLock::new()),
            computations: AtomicU64::new(0),
        }
    }

    /// Number of real recomputations performed by this service instance.
    ///
    /// Incremented only when a day's row is actually rebuilt, never on cache
    /// hits or skipped days.
    pub fn computations_run(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Existence check by the unique day key.
    pub fn has_computed_stats(&self, date: NaiveDate) -> Result<bool> {
        self.db.has_daily_stats(date)
    }

    /// Rebuild the daily stats for one local calendar day.
    ///
    /// The window is `[local midnight, next local midnight)`. A synthetic
    /// carry-over activation at the window start inherits the label of the
    /// latest activation strictly before it (or [`UNKNOWN_ORIGIN_LABEL`]),
    /// so the segment builder can treat the window as self-contained. The
    /// carry-over exists only in memory and is never persisted.
    pub fn compute_stats_for_date(&self, date: NaiveDate) -> Result<DailyStats> {
        let job_id = self.db.create_job(date)?;
        let _guard = self.dates.acquire(date);
        if let Err(e) = self.db.mark_job(job_id, JobStatus::Computing, None) {
            tracing::warn!(%date, error = %e, "Failed to mark computation job as computing");
        }

        let result = self.compute_inner(date);
        match &result {
            Ok(stats) => {
                if let Err(e) = self.db.mark_job(job_id, JobStatus::Completed, None) {
                    tracing::warn!(%date, error = %e, "Failed to mark computation job as completed");
                }
                tracing::info!(
                    %date,
                    total_active_secs = stats.total_active_secs,
                    total_keypresses = stats.total_keypresses,
                    contexts = stats.app_usages.len(),
                    "Computed daily stats"
                );
            }
            Err(e) => {
                tracing::error!(%date, kind = e.kind(), error = %e, "Daily stats computation failed");
                if let Err(mark_err) =
                    self.db
                        .mark_job(job_id, JobStatus::Failed, Some(&e.to_string()))
                {
                    tracing::warn!(%date, error = %mark_err, "Failed to mark computation job as failed");
                }
            }
        }
        result
    }

    fn compute_inner(&self, date: NaiveDate) -> Result<DailyStats> {
        let start = day_start(date);
        let end = next_day_start(date);

        let in_window = self.db.activations_in(start, end)?;
        let keypresses = self.db.keypresses_in(start, end)?;

        let carry_over_label = self
            .db
            .latest_activation_before(start)?
            .map(|a| a.context_label)
            .unwrap_or_else(|| UNKNOWN_ORIGIN_LABEL.to_string());

        let mut activations = Vec::with_capacity(in_window.len() + 1);
        activations.push(ActivationEvent {
            timestamp: start,
            context_label: carry_over_label,
        });
        activations.extend(in_window);

        let usages = segments::usage_durations(&activations, Utc::now());
        let counts = segments::keypress_counts(&activations, &keypresses);

        let total_active_secs: i64 = usages.iter().map(|u| u.duration_secs).sum();
        let total_keypresses: i64 = counts.iter().map(|c| c.count).sum();

        let app_usages: Vec<AppUsage> = usages
            .into_iter()
            .map(|u| {
                let keypresses = counts
                    .iter()
                    .find(|c| c.context_label == u.context_label)
                    .map(|c| c.count)
                    .unwrap_or(0);
                AppUsage {
                    context_label: u.context_label,
                    duration_secs: u.duration_secs,
                    keypresses,
                }
            })
            .collect();

        let keypress_segments: Vec<KeypressSegment> = counts
            .into_iter()
            .map(|c| KeypressSegment {
                context_label: c.context_label,
                count: c.count,
            })
            .collect();

        let stats = DailyStats {
            date,
            total_keypresses,
            total_active_secs,
            last_computed_at: Utc::now(),
            app_usages,
            keypress_segments,
        };

        self.db.replace_daily_stats(&stats)?;
        self.computations.fetch_add(1, Ordering::Relaxed);
        Ok(stats)
    }

    /// Backfill daily stats for every past day that lacks one.
    ///
    /// Walks from the earliest event's local day up to, but excluding,
    /// today (today's window is still open). Days already computed are
    /// skipped, so repeated calls are idempotent. Fail-fast: the first
    /// day-level failure aborts the remaining backfill.
    ///
    /// Returns the number of days computed.
    pub fn compute_missing_stats(&self) -> Result<usize> {
        let Some(earliest) = self.db.earliest_event_timestamp()? else {
            tracing::debug!("No events recorded; nothing to backfill");
            return Ok(0);
        };

        let today = Local::now().date_naive();
        let mut day = local_day(earliest);
        let mut computed = 0usize;

        while day < today {
            if !self.db.has_daily_stats(day)? {
                self.compute_stats_for_date(day)
                    .map_err(|e| Error::ComputationAborted {
                        date: day,
                        source: Box::new(e),
                    })?;
                computed += 1;
            }
            day += Duration::days(1);
        }

        if computed > 0 {
            tracing::info!(days = computed, "Backfill complete");
        }
        Ok(computed)
    }
}
