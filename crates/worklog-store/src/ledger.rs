//! The worklog ledger: one versioned JSON document holding every entry.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tracing::info;
use worklog_core::{NewWorklog, SyncStatus, WorklogEntry, WorklogId, WorklogPatch};

use crate::document::{DOCUMENT_VERSION, Document, DocumentFile};
use crate::error::{Result, StoreError};
use crate::gate::ResourceGate;

/// On-disk layout of the ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    /// Format version.
    pub version: String,
    /// Last write.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Entries in insertion order.
    #[serde(default)]
    pub worklogs: Vec<WorklogEntry>,
}

impl Document for LedgerDocument {
    const KIND: &'static str = "worklog";

    fn empty(now: OffsetDateTime) -> Self {
        Self {
            version: DOCUMENT_VERSION.to_owned(),
            updated_at: now,
            worklogs: Vec::new(),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn touch(&mut self, now: OffsetDateTime) {
        self.updated_at = now;
    }
}

impl LedgerDocument {
    fn position(&self, id: WorklogId) -> Result<usize> {
        self.worklogs
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: WorklogId) -> StoreError {
    StoreError::NotFound {
        kind: LedgerDocument::KIND,
        id: id.to_string(),
    }
}

/// Persistent collection of worklog entries.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    file: DocumentFile<LedgerDocument>,
}

impl LedgerStore {
    /// Open the ledger at `path`. Writes are serialized through `gate`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, gate: ResourceGate) -> Self {
        Self {
            file: DocumentFile::new(path, gate),
        }
    }

    /// Keep at most `limit` snapshots of the ledger file.
    #[must_use]
    pub fn with_backup_limit(self, limit: usize) -> Self {
        Self {
            file: self.file.with_backup_limit(limit),
        }
    }

    /// Underlying document file.
    #[must_use]
    pub const fn file(&self) -> &DocumentFile<LedgerDocument> {
        &self.file
    }

    /// All entries in insertion order.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn list(&self) -> Result<Vec<WorklogEntry>> {
        Ok(self.file.read().await?.worklogs)
    }

    /// Entries logged on `date`.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn list_by_date(&self, date: Date) -> Result<Vec<WorklogEntry>> {
        self.filtered(|entry| entry.date == date).await
    }

    /// Entries whose date lies in `start..=end`.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn list_by_range(&self, start: Date, end: Date) -> Result<Vec<WorklogEntry>> {
        self.filtered(|entry| start <= entry.date && entry.date <= end).await
    }

    /// Entries not yet accepted by the remote.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn list_pending(&self) -> Result<Vec<WorklogEntry>> {
        self.filtered(|entry| entry.sync_status == SyncStatus::Pending).await
    }

    /// Look up one entry.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no entry has `id`.
    pub async fn get(&self, id: WorklogId) -> Result<WorklogEntry> {
        self.list()
            .await?
            .into_iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| not_found(id))
    }

    async fn filtered(&self, keep: impl Fn(&WorklogEntry) -> bool + Send) -> Result<Vec<WorklogEntry>> {
        Ok(self.list().await?.into_iter().filter(|e| keep(e)).collect())
    }

    /// Store a new pending entry.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be written.
    pub async fn append(&self, draft: NewWorklog) -> Result<WorklogEntry> {
        let entry = WorklogEntry::from_draft(draft, OffsetDateTime::now_utc());
        let stored = entry.clone();
        self.file
            .mutate(move |doc| {
                doc.worklogs.push(entry);
                Ok(())
            })
            .await?;
        info!(id = %stored.id, date = %stored.date, "Appended worklog");
        Ok(stored)
    }

    /// Merge `patch` into the entry and bump its modification time.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no entry has `id`, or
    /// [`StoreError::InvalidState`] if the result would violate the sync
    /// state rules.
    pub async fn update(&self, id: WorklogId, patch: WorklogPatch) -> Result<WorklogEntry> {
        let updated = self
            .file
            .mutate(move |doc| {
                let index = doc.position(id)?;
                let mut candidate = doc.worklogs[index].clone();
                candidate.apply(patch);
                candidate
                    .check_sync_invariants()
                    .map_err(StoreError::InvalidState)?;
                candidate.updated_at = OffsetDateTime::now_utc();
                doc.worklogs[index] = candidate.clone();
                Ok(candidate)
            })
            .await?;
        info!(id = %id, status = %updated.sync_status, "Updated worklog");
        Ok(updated)
    }

    /// Remove an entry.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if no entry has `id`.
    pub async fn delete(&self, id: WorklogId) -> Result<()> {
        self.file
            .mutate(move |doc| {
                let index = doc.position(id)?;
                doc.worklogs.remove(index);
                Ok(())
            })
            .await?;
        info!(id = %id, "Deleted worklog");
        Ok(())
    }

    /// Record that the remote accepted the entry as `remote_entry_id`.
    ///
    /// # Errors
    /// Same as [`LedgerStore::update`].
    pub async fn mark_synced(
        &self,
        id: WorklogId,
        remote_entry_id: impl Into<String> + Send,
    ) -> Result<WorklogEntry> {
        self.update(id, WorklogPatch::synced(remote_entry_id, OffsetDateTime::now_utc()))
            .await
    }

    /// Record a failed sync attempt. A previously assigned remote id is kept.
    ///
    /// # Errors
    /// Same as [`LedgerStore::update`].
    pub async fn mark_error(&self, id: WorklogId, message: impl Into<String> + Send) -> Result<WorklogEntry> {
        self.update(id, WorklogPatch::failed(message)).await
    }
}
