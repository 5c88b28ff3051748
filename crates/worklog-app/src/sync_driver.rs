//! Batch synchronization of ledger entries with the remote tracker.
//!
//! A batch is validated once up front and refused if any issue is an error.
//! Entries are then pushed one at a time; each entry's outcome is recorded
//! on the entry itself and a failure never stops the batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use time::UtcOffset;
use tracing::{info, warn};
use worklog_core::{ValidationResult, Validator, WorklogEntry, WorklogId, WorklogPatch};
use worklog_remote::{RemoteError, RemoteWorklogApi};
use worklog_store::{LedgerStore, StoreError};

use crate::config::SyncConfig;

/// Message recorded on entries that have no remote issue key.
pub const MISSING_KEY_MESSAGE: &str = "missing issue key";

/// Errors surfaced by the synchronization driver.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Validation found blocking issues; nothing was sent.
    #[error("validation blocked synchronization ({} error(s))", .0.count(worklog_core::IssueLevel::Error))]
    Validation(ValidationResult),

    /// Ledger access failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote accepted the entry but the ledger could not record it.
    #[error("remote entry {remote_id} created but not recorded locally: {source}")]
    Unrecorded {
        /// Id assigned by the remote.
        remote_id: String,
        /// Ledger failure.
        source: StoreError,
    },

    /// The entry cannot be sent as it stands.
    #[error("{0}")]
    Entry(String),

    /// The batch was cancelled while this entry was waiting to retry.
    #[error("cancelled while waiting to retry: {0}")]
    Cancelled(RemoteError),
}

/// Cooperative stop request checked between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Flag in the "keep going" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running batch to stop after the current entry.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Position of the batch, reported before each entry is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// 1-based index of the entry about to be sent.
    pub current: usize,
    /// Entries in the batch.
    pub total: usize,
    /// Entry about to be sent.
    pub id: WorklogId,
}

/// Result for one entry of a batch.
#[derive(Debug)]
pub struct EntryOutcome {
    /// Entry the outcome belongs to.
    pub id: WorklogId,
    /// Remote entry id on success.
    pub result: Result<String, SyncError>,
}

/// Aggregate of a completed batch.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Entries accepted by the remote.
    pub success_count: usize,
    /// Entries that failed and were marked as such (where possible).
    pub failure_count: usize,
    /// Entries not attempted because the batch was cancelled.
    pub skipped_count: usize,
    /// Per-entry outcomes, in processing order.
    pub outcomes: Vec<EntryOutcome>,
    /// Validation findings the caller should surface (warnings and infos).
    pub validation: ValidationResult,
}

impl SyncReport {
    /// Whether every attempted entry succeeded and none were skipped.
    #[must_use]
    pub const fn is_complete_success(&self) -> bool {
        self.failure_count == 0 && self.skipped_count == 0
    }
}

/// What [`SyncDriver::run_sync_batch`] did.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Validation found errors; nothing was sent.
    Refused(ValidationResult),
    /// The loop ran.
    Completed(SyncReport),
}

impl BatchOutcome {
    /// Treat a refusal as an error.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] for a refused batch.
    pub fn into_report(self) -> Result<SyncReport, SyncError> {
        match self {
            Self::Refused(result) => Err(SyncError::Validation(result)),
            Self::Completed(report) => Ok(report),
        }
    }
}

/// Validates and pushes batches of entries, recording each outcome in the ledger.
#[derive(Debug)]
pub struct SyncDriver<R> {
    ledger: LedgerStore,
    remote: R,
    validator: Validator,
    settings: SyncConfig,
    offset: UtcOffset,
    cancel: CancelFlag,
}

#[allow(clippy::future_not_send)]
impl<R: RemoteWorklogApi> SyncDriver<R> {
    /// Driver over `ledger` and `remote`.
    #[must_use]
    pub fn new(ledger: LedgerStore, remote: R, validator: Validator, settings: SyncConfig) -> Self {
        Self {
            ledger,
            remote,
            validator,
            settings,
            offset: worklog_core::clock::local_offset(),
            cancel: CancelFlag::new(),
        }
    }

    /// Offset used to turn wall-clock starts into timestamps.
    #[must_use]
    pub const fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Handle that stops a running batch between entries.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Remote client in use.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Validate `entries` without sending anything.
    #[must_use]
    pub fn validate(&self, entries: &[WorklogEntry]) -> ValidationResult {
        self.validator.validate(entries)
    }

    /// Run a batch over every pending entry.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn sync_pending(
        &self,
        progress: &mut impl FnMut(SyncProgress),
    ) -> Result<BatchOutcome, SyncError> {
        let pending = self.ledger.list_pending().await?;
        Ok(self.run_sync_batch(&pending, progress).await)
    }

    /// Validate `entries` and, if nothing blocks, push them one by one in
    /// display order (date, then start time).
    pub async fn run_sync_batch(
        &self,
        entries: &[WorklogEntry],
        progress: &mut impl FnMut(SyncProgress),
    ) -> BatchOutcome {
        let validation = self.validate(entries);
        if !validation.can_sync() {
            warn!(
                errors = validation.count(worklog_core::IssueLevel::Error),
                "Sync refused by validation"
            );
            return BatchOutcome::Refused(validation);
        }

        let mut order: Vec<&WorklogEntry> = entries.iter().collect();
        order.sort_by_key(|entry| (entry.date, entry.start_time));

        let total = order.len();
        let mut report = SyncReport {
            validation,
            ..SyncReport::default()
        };
        info!(total, "Sync batch started");

        for (index, selected) in order.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.skipped_count = total - index;
                warn!(skipped = report.skipped_count, "Sync batch cancelled");
                break;
            }
            progress(SyncProgress {
                current: index + 1,
                total,
                id: selected.id,
            });

            let result = self.sync_entry(selected.id).await;
            match &result {
                Ok(remote_id) => {
                    report.success_count += 1;
                    info!(id = %selected.id, remote_id = %remote_id, "Entry synced");
                }
                Err(err) => {
                    report.failure_count += 1;
                    warn!(id = %selected.id, error = %err, "Entry failed to sync");
                }
            }
            report.outcomes.push(EntryOutcome {
                id: selected.id,
                result,
            });
        }

        info!(
            success = report.success_count,
            failure = report.failure_count,
            skipped = report.skipped_count,
            "Sync batch finished"
        );
        BatchOutcome::Completed(report)
    }

    async fn sync_entry(&self, id: WorklogId) -> Result<String, SyncError> {
        // Re-read so edits made after selection are what gets sent.
        let entry = self.ledger.get(id).await?;

        let Some(issue_key) = entry.issue_key.clone() else {
            self.record_failure(id, MISSING_KEY_MESSAGE).await;
            return Err(SyncError::Entry(MISSING_KEY_MESSAGE.to_owned()));
        };

        match self.push_with_backoff(&entry, &issue_key).await {
            Ok(remote_id) => match self.ledger.mark_synced(id, remote_id.clone()).await {
                Ok(_) => Ok(remote_id),
                Err(source) => {
                    warn!(id = %id, remote_id = %remote_id, error = %source, "Remote entry created but not recorded");
                    self.record_unrecorded(id, &remote_id, &source).await;
                    Err(SyncError::Unrecorded { remote_id, source })
                }
            },
            Err(err) => {
                self.record_failure(id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn push_with_backoff(&self, entry: &WorklogEntry, issue_key: &str) -> Result<String, SyncError> {
        let mut retries = 0;
        loop {
            match self.push(entry, issue_key).await {
                Err(RemoteError::RateLimited { retry_after }) if retries < self.settings.max_rate_limit_retries => {
                    retries += 1;
                    let delay = retry_after.unwrap_or_else(|| self.settings.default_backoff());
                    warn!(
                        id = %entry.id,
                        retry = retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    if self.cancel.is_cancelled() {
                        return Err(SyncError::Cancelled(RemoteError::RateLimited { retry_after }));
                    }
                }
                other => return other.map_err(SyncError::from),
            }
        }
    }

    /// Create the remote entry, or update it when the entry already has a
    /// remote id from an earlier sync.
    async fn push(&self, entry: &WorklogEntry, issue_key: &str) -> Result<String, RemoteError> {
        let started = entry.started_at(self.offset);
        let seconds = entry.duration_seconds();
        match &entry.remote_entry_id {
            Some(remote_id) => {
                self.remote
                    .update_remote_entry(issue_key, remote_id, started, seconds, &entry.description)
                    .await?;
                Ok(remote_id.clone())
            }
            None => {
                self.remote
                    .create_remote_entry(issue_key, started, seconds, &entry.description)
                    .await
            }
        }
    }

    /// Keep the remote id on the entry so the next sync updates instead of
    /// creating a second remote entry.
    async fn record_unrecorded(&self, id: WorklogId, remote_id: &str, source: &StoreError) {
        let patch = WorklogPatch {
            remote_entry_id: Some(Some(remote_id.to_owned())),
            ..WorklogPatch::failed(format!("remote entry {remote_id} created but not recorded: {source}"))
        };
        if let Err(err) = self.ledger.update(id, patch).await {
            warn!(id = %id, remote_id = %remote_id, error = %err, "Could not record remote id");
        }
    }

    async fn record_failure(&self, id: WorklogId, message: &str) {
        if let Err(err) = self.ledger.mark_error(id, message).await {
            warn!(id = %id, error = %err, "Could not record sync failure");
        }
    }
}
