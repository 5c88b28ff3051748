//! Domain types and pre-sync validation for the worklog ledger.

/// Date and wall-clock helpers.
pub mod clock;
/// Worklog entries, drafts, and patches.
pub mod entry;
/// Identifier types.
pub mod id;
/// Remote issue-key format checks.
pub mod issue_key;
/// Sync status.
pub mod state;
/// Task records from the sibling collection.
pub mod task;
/// Batch validation engine.
pub mod validation;

pub use entry::{NewWorklog, WorklogEntry, WorklogPatch};
pub use id::{TaskId, WorklogId};
pub use state::SyncStatus;
pub use task::TaskRecord;
pub use validation::{
    IssueCode, IssueLevel, ValidationIssue, ValidationResult, ValidationRules, Validator, validate,
};
