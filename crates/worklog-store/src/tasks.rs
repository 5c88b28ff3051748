//! The sibling task collection that worklog entries reference.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use worklog_core::{TaskId, TaskRecord};

use crate::document::{DOCUMENT_VERSION, Document, DocumentFile};
use crate::error::{Result, StoreError};
use crate::gate::ResourceGate;

/// On-disk layout of the task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    /// Format version.
    pub version: String,
    /// Last write.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Task records.
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl Document for TaskDocument {
    const KIND: &'static str = "task";

    fn empty(now: OffsetDateTime) -> Self {
        Self {
            version: DOCUMENT_VERSION.to_owned(),
            updated_at: now,
            tasks: Vec::new(),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now;
    }
}

/// Persistent task records.
#[derive(Debug, Clone)]
pub struct TaskStore {
    file: DocumentFile<TaskDocument>,
}

impl TaskStore {
    /// Open the task file at `path`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, gate: ResourceGate) -> Self {
        Self {
            file: DocumentFile::new(path, gate),
        }
    }

    /// Keep at most `limit` snapshots of the task file.
    #[must_use]
    pub fn with_backup_limit(self, limit: usize) -> Self {
        Self {
            file: self.file.with_backup_limit(limit),
        }
    }

    /// All tasks.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub async fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.file.read().await?.tasks)
    }

    /// One task by id.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.list()
            .await?
            .into_iter()
            .find(|task| task.id == id)
            .ok_or_else(|| not_found(id))
    }

    /// Insert `task`, or replace the record with the same id.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn upsert(&self, mut task: TaskRecord) -> Result<TaskRecord> {
        task.updated_at = OffsetDateTime::now_utc();
        let stored = task.clone();
        self.file
            .mutate(move |doc| {
                match doc.tasks.iter_mut().find(|t| t.id == task.id) {
                    Some(existing) => {
                        task.created_at = existing.created_at;
                        *existing = task;
                    }
                    None => doc.tasks.push(task),
                }
                Ok(())
            })
            .await?;
        info!(id = %stored.id, "Saved task");
        self.get(stored.id).await
    }

    /// Remove a task. Worklog entries referencing it are left alone.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn delete(&self, id: TaskId) -> Result<()> {
        self.file
            .mutate(move |doc| {
                let before = doc.tasks.len();
                doc.tasks.retain(|t| t.id != id);
                if doc.tasks.len() == before {
                    return Err(not_found(id));
                }
                Ok(())
            })
            .await?;
        info!(id = %id, "Deleted task");
        Ok(())
    }
}

fn not_found(id: TaskId) -> StoreError {
    StoreError::NotFound {
        kind: TaskDocument::KIND,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_replaces_and_keeps_creation_time() {
        let dir = tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"), ResourceGate::new());
        let task = TaskRecord::new("Import pipeline", Some("PROJ-7".into()), OffsetDateTime::now_utc());
        let created = store.upsert(task.clone()).await.unwrap();

        let mut renamed = created.clone();
        renamed.title = "Import pipeline v2".into();
        renamed.created_at = OffsetDateTime::UNIX_EPOCH;
        let saved = store.upsert(renamed).await.unwrap();

        assert_eq!(saved.title, "Import pipeline v2");
        assert_eq!(saved.created_at, created.created_at);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_task_is_not_found() {
        let dir = tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks.json"), ResourceGate::new());
        let err = store.delete(TaskId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
