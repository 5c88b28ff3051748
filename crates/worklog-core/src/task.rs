use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::id::TaskId;

/// Minimal view of a task record, as needed by the worklog side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Task identifier.
    pub id: TaskId,
    /// Human-readable title.
    pub title: String,
    /// Remote issue key the task is tracked under, if any.
    #[serde(default)]
    pub issue_key: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TaskRecord {
    /// Create a record with fresh id and timestamps.
    #[must_use]
    pub fn new(title: impl Into<String>, issue_key: Option<String>, now: OffsetDateTime) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            issue_key,
            created_at: now,
            updated_at: now,
        }
    }
}
