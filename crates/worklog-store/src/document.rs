//! Versioned JSON documents persisted as a single file.
//!
//! Every mutation runs under the [`ResourceGate`] key of the file and follows
//! load, apply, snapshot, touch, write. The write goes to a sibling temp file
//! which is then renamed over the document, so readers see either the old or
//! the new content.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::backup::{BackupRotation, DEFAULT_BACKUP_LIMIT};
use crate::error::{Result, StoreError};
use crate::gate::ResourceGate;

/// Format version written by this crate.
pub const DOCUMENT_VERSION: &str = "1.0";

/// A top-level document stored in one JSON file.
pub trait Document: Serialize + DeserializeOwned + Send {
    /// Short name used in logs.
    const KIND: &'static str;

    /// A document with no records.
    fn empty(now: OffsetDateTime) -> Self;

    /// Declared format version.
    fn version(&self) -> &str;

    /// Record the modification time.
    fn touch(&mut self, now: OffsetDateTime);
}

/// Gated, backed-up access to one document file.
#[derive(Debug, Clone)]
pub struct DocumentFile<D> {
    path: PathBuf,
    key: String,
    gate: ResourceGate,
    rotation: BackupRotation,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> DocumentFile<D> {
    /// Bind `path` to `gate`. Nothing is touched on disk until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, gate: ResourceGate) -> Self {
        let path = path.into();
        let key = std::path::absolute(&path)
            .unwrap_or_else(|_| path.clone())
            .to_string_lossy()
            .into_owned();
        let rotation = BackupRotation::new(&path, DEFAULT_BACKUP_LIMIT);
        Self {
            path,
            key,
            gate,
            rotation,
            _marker: PhantomData,
        }
    }

    /// Replace the snapshot retention.
    #[must_use]
    pub fn with_backup_limit(mut self, limit: usize) -> Self {
        self.rotation = BackupRotation::new(&self.path, limit);
        self
    }

    /// Document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot policy in use.
    #[must_use]
    pub const fn rotation(&self) -> &BackupRotation {
        &self.rotation
    }

    /// Read the current document, creating an empty one if the file is
    /// missing.
    ///
    /// Reads of an existing file do not take the gate.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, decoded, or created.
    pub async fn read(&self) -> Result<D> {
        if let Some(doc) = self.load().await? {
            return Ok(doc);
        }
        let _permit = self.gate.acquire(&self.key).await;
        if let Some(doc) = self.load().await? {
            return Ok(doc);
        }
        let doc = D::empty(OffsetDateTime::now_utc());
        self.write(&doc).await?;
        info!(kind = D::KIND, path = %self.path.display(), "Initialized empty document");
        Ok(doc)
    }

    /// Apply `change` to the document under the gate and persist it.
    ///
    /// When `change` fails nothing is written and no snapshot is taken. Pruning
    /// old snapshots happens after the write and only logs its failures.
    ///
    /// # Errors
    /// Returns the error from `change`, or an I/O or encoding error.
    pub async fn mutate<F, T>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut D) -> Result<T> + Send,
        T: Send,
    {
        let _permit = self.gate.acquire(&self.key).await;
        let mut doc = match self.load().await? {
            Some(doc) => doc,
            None => D::empty(OffsetDateTime::now_utc()),
        };
        let output = change(&mut doc)?;

        self.rotation.snapshot().await?;
        doc.touch(OffsetDateTime::now_utc());
        self.write(&doc).await?;
        // The write is committed; retention failures only leave extra snapshots.
        if let Err(err) = self.rotation.prune().await {
            warn!(kind = D::KIND, error = %err, "Failed to prune snapshots");
        }
        Ok(output)
    }

    async fn load(&self) -> Result<Option<D>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        let doc: D = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if !is_supported_version(doc.version()) {
            return Err(StoreError::UnsupportedVersion(doc.version().to_owned()));
        }
        Ok(Some(doc))
    }

    async fn write(&self, doc: &D) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        let mut bytes = serde_json::to_vec_pretty(doc)?;
        bytes.push(b'\n');

        let tmp = temp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| StoreError::io(&tmp, err))?;
        file.write_all(&bytes).await.map_err(|err| StoreError::io(&tmp, err))?;
        file.sync_all().await.map_err(|err| StoreError::io(&tmp, err))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        debug!(kind = D::KIND, bytes = bytes.len(), "Document written");
        Ok(())
    }
}

fn is_supported_version(version: &str) -> bool {
    version == "1" || version.starts_with("1.")
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
