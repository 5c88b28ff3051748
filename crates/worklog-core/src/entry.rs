//! Worklog entries, drafts, and partial updates.

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time, UtcOffset};

use crate::clock::{self, date_serde, time_serde};
use crate::id::{TaskId, WorklogId};
use crate::state::SyncStatus;

/// One unit of logged work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogEntry {
    /// Local identifier.
    pub id: WorklogId,
    /// Owning task.
    pub task_id: TaskId,
    /// Remote issue key (e.g. `PROJ-123`).
    #[serde(default)]
    pub issue_key: Option<String>,
    /// Calendar date the work happened on.
    #[serde(with = "date_serde")]
    pub date: Date,
    /// Local wall-clock start.
    #[serde(with = "time_serde")]
    pub start_time: Time,
    /// Local wall-clock end.
    #[serde(with = "time_serde")]
    pub end_time: Time,
    /// Duration in minutes, as supplied by the caller.
    pub duration_minutes: u32,
    /// Free-text description sent as the remote comment.
    #[serde(default)]
    pub description: String,
    /// Denormalized task title for display.
    #[serde(default)]
    pub task_title: String,
    /// Reconciliation state.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// When the entry was last accepted by the remote.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
    /// Identifier assigned by the remote on first successful sync.
    #[serde(default)]
    pub remote_entry_id: Option<String>,
    /// Message of the last failed sync attempt.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl WorklogEntry {
    /// Materialize a draft into a fresh pending entry.
    #[must_use]
    pub fn from_draft(draft: NewWorklog, now: OffsetDateTime) -> Self {
        let NewWorklog {
            task_id,
            issue_key,
            date,
            start_time,
            end_time,
            duration_minutes,
            description,
            task_title,
        } = draft;
        Self {
            id: WorklogId::new(),
            task_id,
            issue_key: normalize_key(issue_key),
            date,
            start_time,
            end_time,
            duration_minutes,
            description,
            task_title,
            sync_status: SyncStatus::Pending,
            synced_at: None,
            remote_entry_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Duration in seconds as sent to the remote.
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }

    /// Start of the entry as an absolute timestamp at the given offset.
    #[must_use]
    pub const fn started_at(&self, offset: UtcOffset) -> OffsetDateTime {
        clock::at_offset(self.date, self.start_time, offset)
    }

    /// Start and end as minutes since midnight.
    #[must_use]
    pub fn minute_span(&self) -> (u32, u32) {
        (
            clock::minute_of_day(self.start_time),
            clock::minute_of_day(self.end_time),
        )
    }

    /// Check the sync-state invariants.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    pub fn check_sync_invariants(&self) -> Result<(), String> {
        match self.sync_status {
            SyncStatus::Synced if self.remote_entry_id.is_none() => {
                Err(format!("entry {} is synced without a remote entry id", self.id))
            }
            SyncStatus::Synced if self.error_message.is_some() => {
                Err(format!("entry {} is synced but carries an error message", self.id))
            }
            SyncStatus::Error if self.error_message.is_none() => {
                Err(format!("entry {} is in error without an error message", self.id))
            }
            _ => Ok(()),
        }
    }

    /// Apply a partial update in place. Timestamps are left to the caller.
    pub fn apply(&mut self, patch: WorklogPatch) {
        let WorklogPatch {
            task_id,
            issue_key,
            date,
            start_time,
            end_time,
            duration_minutes,
            description,
            task_title,
            sync_status,
            synced_at,
            remote_entry_id,
            error_message,
        } = patch;

        if let Some(value) = task_id {
            self.task_id = value;
        }
        if let Some(value) = issue_key {
            self.issue_key = normalize_key(value);
        }
        if let Some(value) = date {
            self.date = value;
        }
        if let Some(value) = start_time {
            self.start_time = value;
        }
        if let Some(value) = end_time {
            self.end_time = value;
        }
        if let Some(value) = duration_minutes {
            self.duration_minutes = value;
        }
        if let Some(value) = description {
            self.description = value;
        }
        if let Some(value) = task_title {
            self.task_title = value;
        }
        if let Some(value) = sync_status {
            self.sync_status = value;
        }
        if let Some(value) = synced_at {
            self.synced_at = value;
        }
        if let Some(value) = remote_entry_id {
            self.remote_entry_id = value;
        }
        if let Some(value) = error_message {
            self.error_message = value;
        }
    }
}

fn normalize_key(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_owned()).filter(|k| !k.is_empty())
}

/// Caller-supplied fields for a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorklog {
    /// Owning task.
    pub task_id: TaskId,
    /// Remote issue key.
    pub issue_key: Option<String>,
    /// Calendar date.
    pub date: Date,
    /// Wall-clock start.
    pub start_time: Time,
    /// Wall-clock end.
    pub end_time: Time,
    /// Duration in minutes; not recomputed by the store.
    pub duration_minutes: u32,
    /// Free-text description.
    pub description: String,
    /// Denormalized task title.
    pub task_title: String,
}

impl NewWorklog {
    /// Build a draft whose duration is derived from the start and end times.
    #[must_use]
    pub fn spanning(task_id: TaskId, date: Date, start_time: Time, end_time: Time) -> Self {
        Self {
            task_id,
            issue_key: None,
            date,
            start_time,
            end_time,
            duration_minutes: clock::minutes_between(start_time, end_time),
            description: String::new(),
            task_title: String::new(),
        }
    }

    /// Set the remote issue key.
    #[must_use]
    pub fn with_issue_key(mut self, key: impl Into<String>) -> Self {
        self.issue_key = Some(key.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the denormalized task title.
    #[must_use]
    pub fn with_task_title(mut self, title: impl Into<String>) -> Self {
        self.task_title = title.into();
        self
    }
}

/// Partial update for an existing entry.
///
/// Outer `None` leaves a field unchanged; for nullable fields the inner
/// `None` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorklogPatch {
    /// Reassign the owning task.
    pub task_id: Option<TaskId>,
    /// Set or clear the issue key.
    pub issue_key: Option<Option<String>>,
    /// Move to another date.
    pub date: Option<Date>,
    /// Change the start time.
    pub start_time: Option<Time>,
    /// Change the end time.
    pub end_time: Option<Time>,
    /// Change the duration.
    pub duration_minutes: Option<u32>,
    /// Replace the description.
    pub description: Option<String>,
    /// Replace the task title.
    pub task_title: Option<String>,
    /// Change the sync status.
    pub sync_status: Option<SyncStatus>,
    /// Set or clear the sync timestamp.
    pub synced_at: Option<Option<OffsetDateTime>>,
    /// Set or clear the remote entry id.
    pub remote_entry_id: Option<Option<String>>,
    /// Set or clear the error message.
    pub error_message: Option<Option<String>>,
}

impl WorklogPatch {
    /// Returns true when the patch would not change anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.task_id.is_none()
            && self.issue_key.is_none()
            && self.date.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.duration_minutes.is_none()
            && self.description.is_none()
            && self.task_title.is_none()
            && self.sync_status.is_none()
            && self.synced_at.is_none()
            && self.remote_entry_id.is_none()
            && self.error_message.is_none()
    }

    /// Patch recording a successful sync.
    #[must_use]
    pub fn synced(remote_entry_id: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            sync_status: Some(SyncStatus::Synced),
            synced_at: Some(Some(at)),
            remote_entry_id: Some(Some(remote_entry_id.into())),
            error_message: Some(None),
            ..Self::default()
        }
    }

    /// Patch recording a failed sync. The remote entry id is left untouched.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            sync_status: Some(SyncStatus::Error),
            error_message: Some(Some(message.into())),
            ..Self::default()
        }
    }

    /// Returns true when the patch touches fields that describe the work
    /// itself (as opposed to sync bookkeeping).
    #[must_use]
    pub const fn touches_content(&self) -> bool {
        self.task_id.is_some()
            || self.issue_key.is_some()
            || self.date.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.duration_minutes.is_some()
            || self.description.is_some()
            || self.task_title.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, time};

    fn sample() -> WorklogEntry {
        let draft = NewWorklog::spanning(TaskId::new(), date!(2024 - 05 - 06), time!(9:00), time!(10:30))
            .with_issue_key(" PROJ-12 ")
            .with_description("Review of the import pipeline");
        WorklogEntry::from_draft(draft, datetime!(2024-05-06 11:00 UTC))
    }

    #[test]
    fn from_draft_starts_pending_with_empty_sync_fields() {
        let entry = sample();
        assert_eq!(entry.sync_status, SyncStatus::Pending);
        assert!(entry.synced_at.is_none());
        assert!(entry.remote_entry_id.is_none());
        assert!(entry.error_message.is_none());
        assert_eq!(entry.duration_minutes, 90);
        assert_eq!(entry.issue_key.as_deref(), Some("PROJ-12"));
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[test]
    fn serialized_form_uses_ledger_field_names() {
        let entry = sample();
        let value = serde_json::to_value(&entry).expect("serialize entry");
        assert_eq!(value["date"], "2024-05-06");
        assert_eq!(value["startTime"], "09:00");
        assert_eq!(value["endTime"], "10:30");
        assert_eq!(value["durationMinutes"], 90);
        assert_eq!(value["syncStatus"], "pending");
        assert!(value["remoteEntryId"].is_null());
    }

    #[test]
    fn synced_then_failed_keeps_remote_id_and_clears_synced_status() {
        let mut entry = sample();
        entry.apply(WorklogPatch::synced("R-1", datetime!(2024-05-06 12:00 UTC)));
        assert_eq!(entry.sync_status, SyncStatus::Synced);
        assert!(entry.check_sync_invariants().is_ok());

        entry.apply(WorklogPatch::failed("x"));
        assert_eq!(entry.sync_status, SyncStatus::Error);
        assert_eq!(entry.error_message.as_deref(), Some("x"));
        assert_eq!(entry.remote_entry_id.as_deref(), Some("R-1"));
        assert!(entry.check_sync_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_synced_without_remote_id() {
        let mut entry = sample();
        entry.apply(WorklogPatch {
            sync_status: Some(SyncStatus::Synced),
            ..WorklogPatch::default()
        });
        assert!(entry.check_sync_invariants().is_err());
    }

    #[test]
    fn blank_issue_key_is_cleared() {
        let mut entry = sample();
        entry.apply(WorklogPatch {
            issue_key: Some(Some("   ".into())),
            ..WorklogPatch::default()
        });
        assert!(entry.issue_key.is_none());
    }

    #[test]
    fn started_at_uses_offset() {
        let entry = sample();
        let offset = UtcOffset::from_hms(3, 0, 0).expect("valid offset");
        assert_eq!(entry.started_at(offset), datetime!(2024-05-06 9:00 +3));
        assert_eq!(entry.duration_seconds(), 5400);
    }
}
