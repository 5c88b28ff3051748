//! Plain-text output for the command line.

use worklog_app::{SyncProgress, SyncReport};
use worklog_core::clock::{DATE_FORMAT, TIME_FORMAT};
use worklog_core::{IssueLevel, ValidationResult, WorklogEntry};

pub fn entry_table(entries: &[WorklogEntry]) {
    println!("ID | Date | Time | Min | Key | Status | Description");
    println!("-- | ---- | ---- | --- | --- | ------ | -----------");
    for entry in entries {
        println!("{}", entry_row(entry));
    }
}

pub fn entry_row(entry: &WorklogEntry) -> String {
    let date = entry.date.format(DATE_FORMAT).unwrap_or_else(|_| entry.date.to_string());
    let start = entry
        .start_time
        .format(TIME_FORMAT)
        .unwrap_or_else(|_| entry.start_time.to_string());
    let end = entry
        .end_time
        .format(TIME_FORMAT)
        .unwrap_or_else(|_| entry.end_time.to_string());
    let status = entry.error_message.as_deref().map_or_else(
        || entry.sync_status.to_string(),
        |message| format!("{} ({message})", entry.sync_status),
    );
    let description = if entry.description.is_empty() {
        "-"
    } else {
        entry.description.as_str()
    };
    format!(
        "{} | {date} | {start}-{end} | {} | {} | {status} | {description}",
        entry.id,
        entry.duration_minutes,
        entry.issue_key.as_deref().unwrap_or("-"),
    )
}

pub fn validation(result: &ValidationResult) {
    if result.is_clean() {
        println!("No validation issues");
        return;
    }
    for issue in &result.issues {
        match issue.entry_id {
            Some(id) => println!("{issue} [{id}]"),
            None => println!("{issue}"),
        }
    }
    println!(
        "{} error(s), {} warning(s), {} info",
        result.count(IssueLevel::Error),
        result.count(IssueLevel::Warning),
        result.count(IssueLevel::Info),
    );
}

pub fn progress(step: SyncProgress) {
    println!("[{}/{}] syncing {}", step.current, step.total, step.id);
}

pub fn report(report: &SyncReport) {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(remote_id) => println!("synced {} -> {remote_id}", outcome.id),
            Err(err) => println!("failed {}: {err}", outcome.id),
        }
    }
    println!(
        "synced: {}, failed: {}, skipped: {}",
        report.success_count, report.failure_count, report.skipped_count
    );
}
