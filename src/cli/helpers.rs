//! Shared helper functions for CLI commands.

use chrono::{DateTime, Local, Utc};
use console::{style, StyledObject};

use crate::models::{JobStatus, TargetStatus};

/// Truncate to at most `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Local time, or `fallback` when unset.
pub fn format_time(dt: Option<DateTime<Utc>>, fallback: &str) -> String {
    dt.map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| fallback.to_string())
}

pub fn styled_target_status(status: TargetStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        TargetStatus::Pending => s.dim(),
        TargetStatus::Crawling => s.cyan(),
        TargetStatus::Done => s.green(),
        TargetStatus::Error => s.red(),
    }
}

pub fn styled_job_status(status: JobStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        JobStatus::Queued => s.dim(),
        JobStatus::Running => s.cyan(),
        JobStatus::Succeeded => s.green(),
        JobStatus::Failed => s.red(),
    }
}
