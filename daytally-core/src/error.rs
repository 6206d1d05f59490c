//! Error types for daytally-core

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for the daytally-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Storage read failed; the current operation is aborted, no retry
    #[error("storage read error: {0}")]
    StorageRead(#[source] rusqlite::Error),

    /// Storage write failed; the current operation is aborted, no retry
    #[error("storage write error: {0}")]
    StorageWrite(#[source] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Backfill stopped at the first failing day (fail-fast policy)
    #[error("backfill aborted at {date}: {source}")]
    ComputationAborted {
        date: NaiveDate,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Short kind name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StorageRead(_) => "storage_read",
            Error::StorageWrite(_) => "storage_write",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::ComputationAborted { .. } => "computation_aborted",
        }
    }
}

/// Result type alias for daytally-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_carries_date_and_cause() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = Error::ComputationAborted {
            date,
            source: Box::new(Error::Config("boom".into())),
        };
        let text = err.to_string();
        assert!(text.contains("2024-03-01"));
        assert!(text.contains("boom"));
        assert_eq!(err.kind(), "computation_aborted");
    }
}
