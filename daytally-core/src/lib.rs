//! # daytally-core
//!
//! Core library for daytally - a personal activity tracker that turns two
//! raw event streams (context activations and keypresses) into per-day
//! usage statistics.
//!
//! This library provides:
//! - Domain types for events, daily stats, and timeframes
//! - SQLite storage layer for the event streams and daily aggregates
//! - The pure segment builder (durations, attribution, histograms)
//! - The daily rollup service with idempotent backfill
//! - A midnight scheduler and a timeframe query cache
//!
//! ## Architecture
//!
//! Data flows upward through the layers:
//! - **Event store:** append-only activation/keypress streams (SQLite)
//! - **Segment builder:** pure event-sequence → duration/attribution math
//! - **Daily rollup:** one fully-replaced aggregate row per calendar day
//! - **Query cache:** memoized timeframe views over the daily rows
//!
//! The scheduler drives the rollup service at each local midnight,
//! independently of queries.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daytally_core::{Config, Database, RollupService, StatsCache, Timeframe};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open(&config.database_path()).expect("failed to open database"));
//! db.migrate().expect("failed to run migrations");
//!
//! let rollup = Arc::new(RollupService::new(Arc::clone(&db)));
//! let cache = StatsCache::new(Arc::clone(&db), Arc::clone(&rollup));
//! let week = cache.stats(Timeframe::Week, None).expect("query failed");
//! println!("{} keypresses this week", week.total_keypresses);
//! ```

// Re-export commonly used items at the crate root
pub use cache::{AggregateStats, StatsCache};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use rollup::RollupService;
pub use scheduler::Scheduler;
pub use types::*;

// Public modules
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod rollup;
pub mod scheduler;
pub mod segments;
pub mod types;
