//! File-backed persistence for the worklog ledger and task collection.
//!
//! All writers of one file share a [`ResourceGate`] keyed by the file's
//! absolute path, which rules out lost updates between overlapping
//! read-modify-write cycles in the same process.

/// Snapshot rotation.
pub mod backup;
/// Generic versioned JSON document file.
pub mod document;
/// Error types.
pub mod error;
/// Named-resource mutual exclusion.
pub mod gate;
/// Worklog ledger.
pub mod ledger;
/// Task collection.
pub mod tasks;

pub use backup::{BackupRotation, DEFAULT_BACKUP_LIMIT};
pub use document::{DOCUMENT_VERSION, Document, DocumentFile};
pub use error::StoreError;
pub use gate::{GatePermit, ResourceGate};
pub use ledger::{LedgerDocument, LedgerStore};
pub use tasks::{TaskDocument, TaskStore};
