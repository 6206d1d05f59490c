//! Database repository layer
//!
//! Query and insert operations for the two raw event streams and the derived
//! daily aggregates. The event tables are append-only: the aggregation core
//! never mutates or deletes raw events, only the capture collaborators write
//! them. Daily stats rows are replaced wholesale inside one transaction so a
//! reader never observes a half-written day.

use crate::error::{Error, Result};
use crate::types::{
    ActivationEvent, AppUsage, ComputationJob, DailyStats, JobStatus, KeypressEvent,
    KeypressSegment,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, DATE_FMT).unwrap_or_else(|_| Utc::now().date_naive())
}

/// Database handle (single connection, serialized through a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(Error::StorageRead)?;

        // Foreign keys drive the cascade-owned child rollups; WAL keeps
        // readers unblocked during recomputation.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )
        .map_err(Error::StorageWrite)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::StorageRead)?;
        conn.execute("PRAGMA foreign_keys = ON", [])
            .map_err(Error::StorageWrite)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Event store: append
    // ============================================

    /// Append a context-activation event (capture collaborator entry point)
    pub fn append_activation(&self, event: &ActivationEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO activation_events (ts, context_label) VALUES (?1, ?2)",
            params![event.timestamp.to_rfc3339(), event.context_label],
        )
        .map_err(Error::StorageWrite)?;
        Ok(())
    }

    /// Append a keypress event (capture collaborator entry point)
    pub fn append_keypress(&self, event: &KeypressEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO keypress_events (ts, key_code) VALUES (?1, ?2)",
            params![event.timestamp.to_rfc3339(), event.key_code],
        )
        .map_err(Error::StorageWrite)?;
        Ok(())
    }

    // ============================================
    // Event store: range queries
    // ============================================

    /// Activation events in `[from, to)`, ascending by timestamp
    pub fn activations_in(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivationEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT ts, context_label FROM activation_events
                 WHERE ts >= ?1 AND ts < ?2 ORDER BY ts ASC",
            )
            .map_err(Error::StorageRead)?;
        let events = stmt
            .query_map(
                params![from.to_rfc3339(), to.to_rfc3339()],
                Self::row_to_activation,
            )
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead)?;
        Ok(events)
    }

    /// Keypress events in `[from, to)`, ascending by timestamp
    pub fn keypresses_in(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<KeypressEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT ts, key_code FROM keypress_events
                 WHERE ts >= ?1 AND ts < ?2 ORDER BY ts ASC",
            )
            .map_err(Error::StorageRead)?;
        let events = stmt
            .query_map(
                params![from.to_rfc3339(), to.to_rfc3339()],
                Self::row_to_keypress,
            )
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead)?;
        Ok(events)
    }

    /// The latest activation strictly before `ts`, if any.
    ///
    /// This is the carry-over source: it tells a window which context was
    /// already active when the window opened.
    pub fn latest_activation_before(&self, ts: DateTime<Utc>) -> Result<Option<ActivationEvent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT ts, context_label FROM activation_events
             WHERE ts < ?1 ORDER BY ts DESC LIMIT 1",
            params![ts.to_rfc3339()],
            Self::row_to_activation,
        )
        .optional()
        .map_err(Error::StorageRead)
    }

    /// Earliest timestamp across both event streams, if any events exist.
    pub fn earliest_event_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let earliest: Option<String> = conn
            .query_row(
                "SELECT MIN(ts) FROM (
                     SELECT MIN(ts) AS ts FROM activation_events
                     UNION ALL
                     SELECT MIN(ts) AS ts FROM keypress_events
                 )",
                [],
                |r| r.get(0),
            )
            .map_err(Error::StorageRead)?;
        Ok(earliest.as_deref().map(parse_ts))
    }

    fn row_to_activation(row: &Row) -> rusqlite::Result<ActivationEvent> {
        let ts_str: String = row.get("ts")?;
        Ok(ActivationEvent {
            timestamp: parse_ts(&ts_str),
            context_label: row.get("context_label")?,
        })
    }

    fn row_to_keypress(row: &Row) -> rusqlite::Result<KeypressEvent> {
        let ts_str: String = row.get("ts")?;
        Ok(KeypressEvent {
            timestamp: parse_ts(&ts_str),
            key_code: row.get("key_code")?,
        })
    }

    // ============================================
    // Daily stats
    // ============================================

    /// Replace the daily stats row for `stats.date` wholesale.
    ///
    /// Delete and insert happen in one transaction: on any failure the
    /// transaction rolls back and the previous row stays visible, so there
    /// is no window where readers see an empty day.
    pub fn replace_daily_stats(&self, stats: &DailyStats) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(Error::StorageWrite)?;

        let date_str = stats.date.format(DATE_FMT).to_string();
        tx.execute("DELETE FROM daily_stats WHERE date = ?1", params![date_str])
            .map_err(Error::StorageWrite)?;

        tx.execute(
            "INSERT INTO daily_stats (date, total_keypresses, total_active_secs, last_computed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                date_str,
                stats.total_keypresses,
                stats.total_active_secs,
                stats.last_computed_at.to_rfc3339(),
            ],
        )
        .map_err(Error::StorageWrite)?;
        let stats_id = tx.last_insert_rowid();

        for usage in &stats.app_usages {
            tx.execute(
                "INSERT INTO app_usages (daily_stats_id, context_label, duration_secs, keypresses)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    stats_id,
                    usage.context_label,
                    usage.duration_secs,
                    usage.keypresses
                ],
            )
            .map_err(Error::StorageWrite)?;
        }

        for segment in &stats.keypress_segments {
            tx.execute(
                "INSERT INTO keypress_segments (daily_stats_id, context_label, count)
                 VALUES (?1, ?2, ?3)",
                params![stats_id, segment.context_label, segment.count],
            )
            .map_err(Error::StorageWrite)?;
        }

        tx.commit().map_err(Error::StorageWrite)
    }

    /// Get the daily stats row for one day, with its child rollups.
    ///
    /// `None` means the day was never computed, not that it had zero
    /// activity; callers distinguishing the two use [`Self::has_daily_stats`].
    pub fn get_daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>> {
        let conn = self.conn.lock().unwrap();
        let header: Option<(i64, DailyStats)> = conn
            .query_row(
                "SELECT id, date, total_keypresses, total_active_secs, last_computed_at
                 FROM daily_stats WHERE date = ?1",
                params![date.format(DATE_FMT).to_string()],
                Self::row_to_daily_stats_header,
            )
            .optional()
            .map_err(Error::StorageRead)?;

        match header {
            Some((id, mut stats)) => {
                stats.app_usages = Self::load_app_usages(&conn, id)?;
                stats.keypress_segments = Self::load_keypress_segments(&conn, id)?;
                Ok(Some(stats))
            }
            None => Ok(None),
        }
    }

    /// Daily stats rows for the inclusive date range, ascending by date.
    ///
    /// Days never computed are simply absent. Scans are bounded by the
    /// daily granularity (a year is 365 rows) rather than by event volume.
    pub fn daily_stats_in(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, date, total_keypresses, total_active_secs, last_computed_at
                 FROM daily_stats WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
            )
            .map_err(Error::StorageRead)?;
        let headers = stmt
            .query_map(
                params![
                    from.format(DATE_FMT).to_string(),
                    to.format(DATE_FMT).to_string()
                ],
                Self::row_to_daily_stats_header,
            )
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead)?;

        let mut rows = Vec::with_capacity(headers.len());
        for (id, mut stats) in headers {
            stats.app_usages = Self::load_app_usages(&conn, id)?;
            stats.keypress_segments = Self::load_keypress_segments(&conn, id)?;
            rows.push(stats);
        }
        Ok(rows)
    }

    /// Existence check by the unique day key.
    pub fn has_daily_stats(&self, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM daily_stats WHERE date = ?1",
                params![date.format(DATE_FMT).to_string()],
                |r| r.get(0),
            )
            .map_err(Error::StorageRead)?;
        Ok(count > 0)
    }

    /// Earliest computed day, if any.
    pub fn earliest_daily_stats_date(&self) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock().unwrap();
        let earliest: Option<String> = conn
            .query_row("SELECT MIN(date) FROM daily_stats", [], |r| r.get(0))
            .map_err(Error::StorageRead)?;
        Ok(earliest.as_deref().map(parse_date))
    }

    fn row_to_daily_stats_header(row: &Row) -> rusqlite::Result<(i64, DailyStats)> {
        let date_str: String = row.get("date")?;
        let computed_str: String = row.get("last_computed_at")?;
        Ok((
            row.get("id")?,
            DailyStats {
                date: parse_date(&date_str),
                total_keypresses: row.get("total_keypresses")?,
                total_active_secs: row.get("total_active_secs")?,
                last_computed_at: parse_ts(&computed_str),
                app_usages: Vec::new(),
                keypress_segments: Vec::new(),
            },
        ))
    }

    fn load_app_usages(conn: &Connection, stats_id: i64) -> Result<Vec<AppUsage>> {
        let mut stmt = conn
            .prepare(
                "SELECT context_label, duration_secs, keypresses FROM app_usages
                 WHERE daily_stats_id = ?1
                 ORDER BY duration_secs DESC, context_label ASC",
            )
            .map_err(Error::StorageRead)?;
        let rows = stmt
            .query_map(params![stats_id], |row| {
                Ok(AppUsage {
                    context_label: row.get("context_label")?,
                    duration_secs: row.get("duration_secs")?,
                    keypresses: row.get("keypresses")?,
                })
            })
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead);
        rows
    }

    fn load_keypress_segments(conn: &Connection, stats_id: i64) -> Result<Vec<KeypressSegment>> {
        let mut stmt = conn
            .prepare(
                "SELECT context_label, count FROM keypress_segments
                 WHERE daily_stats_id = ?1
                 ORDER BY count DESC, context_label ASC",
            )
            .map_err(Error::StorageRead)?;
        let rows = stmt
            .query_map(params![stats_id], |row| {
                Ok(KeypressSegment {
                    context_label: row.get("context_label")?,
                    count: row.get("count")?,
                })
            })
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead);
        rows
    }

    // ============================================
    // Computation jobs
    // ============================================

    /// Record a new computation attempt for `date` in the pending state.
    pub fn create_job(&self, date: NaiveDate) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO computation_jobs (date, status, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                date.format(DATE_FMT).to_string(),
                JobStatus::Pending.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(Error::StorageWrite)?;
        Ok(conn.last_insert_rowid())
    }

    /// Advance a computation attempt to `status`.
    ///
    /// Terminal states (completed, failed) also record `completed_at`.
    pub fn mark_job(&self, id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let completed_at = match status {
            JobStatus::Completed | JobStatus::Failed => Some(Utc::now().to_rfc3339()),
            JobStatus::Pending | JobStatus::Computing => None,
        };
        conn.execute(
            "UPDATE computation_jobs
             SET status = ?2, completed_at = ?3, error_message = ?4
             WHERE id = ?1",
            params![id, status.as_str(), completed_at, error],
        )
        .map_err(Error::StorageWrite)?;
        Ok(())
    }

    /// Most recent computation attempts, newest first.
    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<ComputationJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, date, status, created_at, completed_at, error_message
                 FROM computation_jobs ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(Error::StorageRead)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let date_str: String = row.get("date")?;
                let status_str: String = row.get("status")?;
                let created_str: String = row.get("created_at")?;
                let completed_str: Option<String> = row.get("completed_at")?;
                Ok(ComputationJob {
                    id: row.get("id")?,
                    date: parse_date(&date_str),
                    status: JobStatus::from_storage(&status_str),
                    created_at: parse_ts(&created_str),
                    completed_at: completed_str.as_deref().map(parse_ts),
                    error_message: row.get("error_message")?,
                })
            })
            .map_err(Error::StorageRead)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::StorageRead);
        rows
    }
}
