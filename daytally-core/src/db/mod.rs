//! Database layer for daytally
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for event-stream and daily-stats queries
//! - Cascade-owned child rollup rows for daily aggregates

pub mod repo;
pub mod schema;

pub use repo::Database;
