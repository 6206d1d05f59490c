//! Core domain types for daytally
//!
//! These types represent the two raw event streams captured by the platform
//! collaborators and the derived per-day aggregates built from them.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Context** | The thing that was active: an application, window, or document, identified by its label |
//! | **Activation Event** | A record that a context became active at a timestamp; in effect until the next one |
//! | **Keypress Event** | A discrete key-down occurrence; attribution to a context is derived, never stored |
//! | **Daily Stats** | The fully-replaced aggregate of one local calendar day |
//! | **Carry-over** | A synthetic activation at a window start inheriting the previously-active label |
//! | **Timeframe** | A named query granularity selecting a date range for aggregation |
//!
//! All timestamps are stored in UTC; calendar-day arithmetic (day boundaries,
//! histogram buckets) uses the host's local timezone at computation time.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Raw events
// ============================================

/// A context-focus change: `context_label` became active at `timestamp`.
///
/// The context is implicitly active until the next activation event
/// (or "now" / end-of-day for the final one). Append-only, immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationEvent {
    /// When the context became active
    pub timestamp: DateTime<Utc>,
    /// Label of the newly-active context (app name, window title, ...)
    pub context_label: String,
}

/// A discrete key-down occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypressEvent {
    /// When the key was pressed
    pub timestamp: DateTime<Utc>,
    /// Platform key code of the pressed key
    pub key_code: i64,
}

// ============================================
// Daily aggregates
// ============================================

/// Precomputed statistics for one local calendar day.
///
/// At most one row exists per day (unique on `date`). The row is never
/// patched incrementally: recomputation deletes and rebuilds it wholesale
/// inside a single transaction, so readers either see the old row or the
/// complete new one. `app_usages` and `keypress_segments` are owned by the
/// row and cascade-deleted with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    /// The local calendar day this row covers
    pub date: NaiveDate,
    /// Total attributed keypresses for the day
    pub total_keypresses: i64,
    /// Total active time in seconds; equals the sum of `app_usages` durations
    pub total_active_secs: i64,
    /// When this row was (re)computed
    pub last_computed_at: DateTime<Utc>,
    /// Per-context usage breakdown, sorted by duration descending
    pub app_usages: Vec<AppUsage>,
    /// Per-context keypress breakdown, sorted by count descending
    pub keypress_segments: Vec<KeypressSegment>,
}

/// Per-context usage rollup, child of a [`DailyStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsage {
    /// Context label
    pub context_label: String,
    /// Active time attributed to this context, in seconds
    pub duration_secs: i64,
    /// Keypresses attributed to this context
    pub keypresses: i64,
}

/// Per-context keypress rollup, child of a [`DailyStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypressSegment {
    /// Context label
    pub context_label: String,
    /// Keypresses attributed to this context
    pub count: i64,
}

// ============================================
// Computation jobs
// ============================================

/// Lifecycle state of a day's computation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued, waiting on the per-date lock
    Pending,
    /// Currently recomputing the day
    Computing,
    /// Finished and the day's row was replaced
    Completed,
    /// Finished with an error; the previous row (if any) is still visible
    Failed,
}

impl JobStatus {
    /// Convert to string for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Computing => "computing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse status string from storage.
    pub fn from_storage(value: &str) -> Self {
        match value {
            "pending" => JobStatus::Pending,
            "computing" => JobStatus::Computing,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

/// Audit record of one recomputation attempt for a day.
///
/// One row is written per attempt; the newest row for a date reflects the
/// outcome of its most recent recomputation.
#[derive(Debug, Clone)]
pub struct ComputationJob {
    /// Row ID
    pub id: i64,
    /// The day being computed
    pub date: NaiveDate,
    /// Current lifecycle state
    pub status: JobStatus,
    /// When the attempt was queued
    pub created_at: DateTime<Utc>,
    /// When the attempt reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Error text for failed attempts
    pub error_message: Option<String>,
}

// ============================================
// Timeframes
// ============================================

/// Named query granularity used to select a date range for aggregation.
///
/// `Day` addresses one specific calendar day; the wider frames are trailing
/// windows ending today. `AllTime` spans from the earliest computed day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Day,
    Week,
    Month,
    Quarter,
    HalfYear,
    Year,
    AllTime,
}

impl Timeframe {
    /// Number of trailing days covered, `None` for `Day` and `AllTime`.
    pub fn trailing_days(&self) -> Option<i64> {
        match self {
            Timeframe::Day | Timeframe::AllTime => None,
            Timeframe::Week => Some(7),
            Timeframe::Month => Some(30),
            Timeframe::Quarter => Some(91),
            Timeframe::HalfYear => Some(182),
            Timeframe::Year => Some(365),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Quarter => "quarter",
            Timeframe::HalfYear => "half-year",
            Timeframe::Year => "year",
            Timeframe::AllTime => "all-time",
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Timeframe::Day),
            "week" => Ok(Timeframe::Week),
            "month" => Ok(Timeframe::Month),
            "quarter" => Ok(Timeframe::Quarter),
            "half-year" => Ok(Timeframe::HalfYear),
            "year" => Ok(Timeframe::Year),
            "all-time" => Ok(Timeframe::AllTime),
            _ => Err(format!("unknown timeframe: {}", s)),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Local-calendar day arithmetic
// ============================================

/// The local calendar day a timestamp falls on.
pub fn local_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// Local midnight of `date`, as a UTC instant.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    resolve_local(date.and_time(NaiveTime::MIN))
}

/// Local 23:59:59 of `date`, as a UTC instant.
///
/// Used to bound a stale open-ended session to its own day instead of
/// leaking into the present.
pub fn day_end(date: NaiveDate) -> DateTime<Utc> {
    resolve_local(date.and_hms_opt(23, 59, 59).unwrap())
}

/// Local midnight of the day after `date`, as a UTC instant.
pub fn next_day_start(date: NaiveDate) -> DateTime<Utc> {
    day_start(date.succ_opt().unwrap_or(date))
}

/// Resolve a local wall-clock time to a UTC instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Nonexistent
/// times (DST spring-forward) shift forward an hour to the next
/// representable wall-clock time.
pub(crate) fn resolve_local(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive).earliest() {
        Some(t) => t.with_timezone(&Utc),
        None => {
            let shifted = naive + Duration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}
