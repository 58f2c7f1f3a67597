//! Terminal rendering shared by the commands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use serde_json::Value;

use devbridge_sync::{FieldDiff, ResolveStatus, SyncOutcome, SyncStatus};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

pub fn status_label(status: SyncStatus) -> ColoredString {
    match status {
        SyncStatus::Synced => "SYNCED".green().bold(),
        SyncStatus::NoSyncNeeded => "UP TO DATE".bright_black().bold(),
        SyncStatus::Conflict => "CONFLICT".yellow().bold(),
        SyncStatus::Failed => "FAILED".red().bold(),
    }
}

pub fn resolve_label(status: ResolveStatus) -> ColoredString {
    match status {
        ResolveStatus::NoConflict => "NO CONFLICT".bright_black().bold(),
        ResolveStatus::Resolved => "RESOLVED".green().bold(),
        ResolveStatus::Failed => "FAILED".red().bold(),
    }
}

/// One-line summary plus the changed fields.
pub fn print_outcome(outcome: &SyncOutcome) {
    let route = match outcome.written_to {
        Some(target) => format!(" {} → {}", target.other(), target),
        None => String::new(),
    };
    println!("{} {}{route}", status_label(outcome.status), outcome.entity);
    let (left, right) = match outcome.written_to {
        Some(target) => (target.other().as_str(), target.as_str()),
        None => ("github", "azure"),
    };
    print_differences(&outcome.differences, left, right);
    if let Some(error) = &outcome.error {
        println!("  {}", error.red());
    }
    if outcome.status == SyncStatus::Conflict {
        println!(
            "  Run 'devbridge resolve {} {} --source github|azure' to pick a side.",
            outcome.entity.entity_type(),
            outcome.entity.entity_id()
        );
    }
}

pub fn print_differences(differences: &[FieldDiff], left: &str, right: &str) {
    for diff in differences {
        println!(
            "  {}: {} {} → {} {}",
            diff.field.bold(),
            left,
            compact(&diff.left),
            right,
            compact(&diff.right)
        );
    }
}

/// JSON on one line, long values cut at 60 characters.
pub fn compact(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= 60 {
        return rendered;
    }
    let head: String = rendered.chars().take(57).collect();
    format!("{head}...")
}

pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// "just now", "5m ago", "3h ago", "2d ago".
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
