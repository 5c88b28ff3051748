use serde::{Deserialize, Serialize};
use std::fmt;

/// Reconciliation state of a worklog entry against the remote tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not yet sent to the remote.
    #[default]
    Pending,
    /// Accepted by the remote; a remote entry id is recorded.
    Synced,
    /// Last attempt failed; the failure message is recorded.
    Error,
}

impl SyncStatus {
    /// String representation used in the ledger file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
