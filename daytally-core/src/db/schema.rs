//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Raw event streams (append-only, written by the capture collaborators)
    -- ============================================

    CREATE TABLE IF NOT EXISTS activation_events (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        ts            DATETIME NOT NULL,
        context_label TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS keypress_events (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        ts            DATETIME NOT NULL,
        key_code      INTEGER NOT NULL
    );

    -- ============================================
    -- Derived daily aggregates (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS daily_stats (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        date              TEXT NOT NULL UNIQUE,     -- local calendar day, YYYY-MM-DD
        total_keypresses  INTEGER NOT NULL,
        total_active_secs INTEGER NOT NULL,
        last_computed_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS app_usages (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        daily_stats_id INTEGER NOT NULL REFERENCES daily_stats(id) ON DELETE CASCADE,
        context_label  TEXT NOT NULL,
        duration_secs  INTEGER NOT NULL,
        keypresses     INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS keypress_segments (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        daily_stats_id INTEGER NOT NULL REFERENCES daily_stats(id) ON DELETE CASCADE,
        context_label  TEXT NOT NULL,
        count          INTEGER NOT NULL
    );

    -- One row per recomputation attempt
    CREATE TABLE IF NOT EXISTS computation_jobs (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        date          TEXT NOT NULL,
        status        TEXT NOT NULL,                -- 'pending', 'computing', 'completed', 'failed'
        created_at    DATETIME NOT NULL,
        completed_at  DATETIME,
        error_message TEXT
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_activation_events_ts ON activation_events(ts);
    CREATE INDEX IF NOT EXISTS idx_keypress_events_ts ON keypress_events(ts);
    CREATE INDEX IF NOT EXISTS idx_app_usages_day ON app_usages(daily_stats_id);
    CREATE INDEX IF NOT EXISTS idx_keypress_segments_day ON keypress_segments(daily_stats_id);
    CREATE INDEX IF NOT EXISTS idx_computation_jobs_date ON computation_jobs(date, created_at);
    CREATE INDEX IF NOT EXISTS idx_computation_jobs_status ON computation_jobs(status) WHERE status != 'completed';
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)
                .map_err(crate::error::Error::StorageWrite)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])
                .map_err(crate::error::Error::StorageWrite)?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .map_err(crate::error::Error::StorageRead)?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "activation_events",
            "keypress_events",
            "daily_stats",
            "app_usages",
            "keypress_segments",
            "computation_jobs",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_cascade_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        for child in ["app_usages", "keypress_segments"] {
            let on_delete: String = conn
                .prepare(&format!("PRAGMA foreign_key_list({})", child))
                .unwrap()
                .query_row([], |row| row.get(6))
                .unwrap();
            assert_eq!(on_delete, "CASCADE", "{} should cascade-delete", child);
        }
    }
}
