//! daytally - personal activity statistics
//!
//! Turns captured context-activation and keypress events into per-day usage
//! statistics, and serves them at day/week/month/... granularity.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use daytally_core::format::{count_display, duration_display};
use daytally_core::{Config, Database, RollupService, Scheduler, StatsCache, Timeframe};

#[derive(Parser, Debug)]
#[command(name = "daytally")]
#[command(about = "Personal activity statistics from context and keypress events")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the midnight rollup scheduler in the foreground
    Daemon,
    /// Print aggregated stats for a timeframe
    Report {
        /// Timeframe: day, week, month, quarter, half-year, year, all-time
        #[arg(long, default_value = "day")]
        timeframe: Timeframe,

        /// Specific day for the day timeframe (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Compute daily stats for every past day that lacks one
    Backfill,
    /// Show which recent days are computed and the latest job outcomes
    Status {
        /// How many past days to inspect
        #[arg(long, default_value_t = 14)]
        days: i64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = daytally_core::logging::init(&config.logging).ok();

    let db = Arc::new(
        Database::open(&config.database_path()).context("failed to open database")?,
    );
    db.migrate().context("failed to run migrations")?;

    let rollup = Arc::new(RollupService::new(Arc::clone(&db)));
    let cache = Arc::new(StatsCache::new(Arc::clone(&db), Arc::clone(&rollup)));

    match args.command {
        Command::Daemon => run_daemon(&config, rollup, cache),
        Command::Report { timeframe, date } => run_report(&cache, timeframe, date),
        Command::Backfill => {
            let computed = rollup
                .compute_missing_stats()
                .context("backfill aborted")?;
            cache.invalidate_all();
            println!("Backfilled {} day(s)", computed);
            Ok(())
        }
        Command::Status { days } => run_status(&db, &rollup, days),
    }
}

fn run_daemon(config: &Config, rollup: Arc<RollupService>, cache: Arc<StatsCache>) -> Result<()> {
    if !config.scheduler.enabled {
        anyhow::bail!("scheduler is disabled in the configuration");
    }

    // Close any gaps from downtime before waiting for the next midnight
    match rollup.compute_missing_stats() {
        Ok(computed) if computed > 0 => {
            tracing::info!(computed, "Startup backfill complete");
            cache.invalidate_all();
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Startup backfill failed"),
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(Scheduler::new(rollup, cache).run());
    Ok(())
}

fn run_report(cache: &StatsCache, timeframe: Timeframe, date: Option<NaiveDate>) -> Result<()> {
    let stats = cache
        .stats(timeframe, date)
        .with_context(|| format!("failed to aggregate {} stats", timeframe))?;

    match timeframe {
        Timeframe::Day => {
            let day = date.unwrap_or_else(|| Local::now().date_naive());
            println!("Stats for {}", day);
        }
        _ => println!("Stats for the last {}", timeframe),
    }
    println!(
        "  active {}  ·  {} keypresses",
        duration_display(stats.total_active_secs),
        count_display(stats.total_keypresses)
    );

    if !stats.usages.is_empty() {
        println!("\nTop contexts by active time:");
        for usage in stats.usages.iter().take(10) {
            println!(
                "  {:<32} {}",
                usage.context_label,
                duration_display(usage.duration_secs)
            );
        }
    }

    if !stats.keypresses.is_empty() {
        println!("\nTop contexts by keypresses:");
        for kp in stats.keypresses.iter().take(10) {
            println!("  {:<32} {}", kp.context_label, count_display(kp.count));
        }
    }

    Ok(())
}

fn run_status(db: &Database, rollup: &RollupService, days: i64) -> Result<()> {
    let today = Local::now().date_naive();

    println!("Daily stats (last {} days):", days);
    for offset in (1..=days).rev() {
        let date = today - Duration::days(offset);
        let computed = rollup
            .has_computed_stats(date)
            .with_context(|| format!("failed to check {}", date))?;
        println!(
            "  {}  {}",
            date,
            if computed { "computed" } else { "missing" }
        );
    }

    let jobs = db.recent_jobs(10).context("failed to read jobs")?;
    if !jobs.is_empty() {
        println!("\nRecent computation jobs:");
        for job in jobs {
            let outcome = match &job.error_message {
                Some(msg) => format!("{} ({})", job.status.as_str(), msg),
                None => job.status.as_str().to_string(),
            };
            println!("  {}  {}", job.date, outcome);
        }
    }

    Ok(())
}
