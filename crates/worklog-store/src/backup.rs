//! Timestamped snapshots of a document file with bounded retention.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// Number of snapshots kept per document unless configured otherwise.
pub const DEFAULT_BACKUP_LIMIT: usize = 10;

const STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second].[subsecond digits:6]");

/// Snapshot policy for one document file.
///
/// Snapshots live in a `backups` directory next to the document and are
/// named `<stem>_backup_<utc stamp>Z.json`.
#[derive(Debug, Clone)]
pub struct BackupRotation {
    source: PathBuf,
    dir: PathBuf,
    stem: String,
    limit: usize,
}

impl BackupRotation {
    /// Rotation for `source` keeping at most `limit` snapshots.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, limit: usize) -> Self {
        let source = source.into();
        let dir = source
            .parent()
            .map_or_else(|| PathBuf::from("backups"), |parent| parent.join("backups"));
        let stem = source
            .file_stem()
            .map_or_else(|| "document".to_owned(), |s| s.to_string_lossy().into_owned());
        Self {
            source,
            dir,
            stem,
            limit,
        }
    }

    /// Directory holding the snapshots.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured retention.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Copy the current document into a new snapshot.
    ///
    /// Returns `None` when the document does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the backup directory or the copy cannot be written.
    pub async fn snapshot(&self) -> Result<Option<PathBuf>> {
        if self.limit == 0 {
            return Ok(None);
        }
        match tokio::fs::try_exists(&self.source).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(err) => return Err(StoreError::io(&self.source, err)),
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?;

        let target = self.free_name(OffsetDateTime::now_utc()).await?;
        tokio::fs::copy(&self.source, &target)
            .await
            .map_err(|err| StoreError::io(&target, err))?;
        debug!(backup = %target.display(), "Snapshot written");
        Ok(Some(target))
    }

    /// Delete the oldest snapshots beyond the retention limit.
    ///
    /// Age is the modification time, ties broken by file name. Failures to
    /// remove individual files are logged and skipped.
    ///
    /// # Errors
    /// Returns an error if the backup directory cannot be listed.
    pub async fn prune(&self) -> Result<usize> {
        let mut snapshots = self.list().await?;
        if snapshots.len() <= self.limit {
            return Ok(0);
        }
        let excess = snapshots.len() - self.limit;
        let mut removed = 0;
        for (path, _) in snapshots.drain(..excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(backup = %path.display(), error = %err, "Failed to remove old snapshot"),
            }
        }
        debug!(removed, kept = self.limit, "Pruned snapshots");
        Ok(removed)
    }

    /// Snapshots of this document, oldest first.
    ///
    /// # Errors
    /// Returns an error if the backup directory exists but cannot be read.
    pub async fn list(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.dir, err)),
        };

        let prefix = format!("{}_backup_", self.stem);
        let mut snapshots = Vec::new();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?
        {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let modified = item
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            snapshots.push((item.path(), modified));
        }
        snapshots.sort_by(|(a_path, a_time), (b_path, b_time)| {
            a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
        });
        Ok(snapshots)
    }

    async fn free_name(&self, now: OffsetDateTime) -> Result<PathBuf> {
        let stamp = now
            .format(STAMP_FORMAT)
            .map_err(|err| StoreError::InvalidState(format!("cannot format backup stamp: {err}")))?;
        let base = format!("{}_backup_{stamp}Z", self.stem);
        let mut candidate = self.dir.join(format!("{base}.json"));
        let mut n = 1;
        while tokio::fs::try_exists(&candidate)
            .await
            .map_err(|err| StoreError::io(&candidate, err))?
        {
            candidate = self.dir.join(format!("{base}-{n}.json"));
            n += 1;
        }
        Ok(candidate)
    }
}
