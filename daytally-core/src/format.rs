//! Formatting helpers shared by report output.

/// Format a duration in seconds for display (e.g., "3h 12m", "45m", "30s").
pub fn duration_display(secs: i64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs.max(0))
    }
}

/// Format a count for display (e.g., "14.2K", "1.3M").
pub fn count_display(count: i64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}
