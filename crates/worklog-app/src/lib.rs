//! Application layer for the worklog ledger.
//!
//! This crate wires the store, validator, and remote client together: the
//! batch synchronization driver, the cached task repository, configuration,
//! and the credential providers used by the command line.

pub mod cache;
pub mod config;
pub mod secrets;
pub mod sync_driver;
pub mod task_repository;

// Re-exports for convenience
pub use cache::ReadThroughCache;
pub use config::{AppConfig, CacheConfig, DataDir, LedgerConfig, SyncConfig};
pub use secrets::{ChainedSecrets, EnvSecretProvider, FileSecretProvider};
pub use sync_driver::{
    BatchOutcome, CancelFlag, EntryOutcome, SyncDriver, SyncError, SyncProgress, SyncReport,
};
pub use task_repository::{CachedTaskRepository, ChangeSignal};
