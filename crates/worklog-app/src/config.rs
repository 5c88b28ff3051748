//! Application configuration and data directory layout.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use worklog_core::ValidationRules;
use worklog_remote::RemoteConfig;

/// Environment variable overriding the data directory.
pub const ENV_HOME: &str = "WORKLOG_HOME";

const APP_DIR: &str = "worklog";
const CONFIG_FILE: &str = "config.toml";
const LEDGER_FILE: &str = "worklogs.json";
const TASKS_FILE: &str = "tasks.json";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Location of every file the application owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use `root` as the data directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `WORKLOG_HOME`, falling back to the platform data directory.
    ///
    /// # Errors
    /// Returns an error when neither is available.
    pub fn discover() -> Result<Self> {
        Self::discover_with(&mut |key| std::env::var(key).ok())
    }

    fn discover_with(fetch: &mut impl FnMut(&'static str) -> Option<String>) -> Result<Self> {
        if let Some(home) = fetch(ENV_HOME).filter(|value| !value.trim().is_empty()) {
            return Ok(Self::new(home));
        }
        dirs::data_dir()
            .map(|dir| Self::new(dir.join(APP_DIR)))
            .context("cannot determine a data directory; set WORKLOG_HOME")
    }

    /// Directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ledger document.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    /// Task document.
    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    /// Configuration file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Stored credentials.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.root.join(CREDENTIALS_FILE)
    }
}

/// Top-level configuration loaded from `config.toml` in the data directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Ledger file settings.
    pub ledger: LedgerConfig,
    /// Read-through cache settings.
    pub cache: CacheConfig,
    /// Remote tracker connection.
    pub remote: RemoteConfig,
    /// Batch synchronization settings.
    pub sync: SyncConfig,
    /// Pre-sync validation thresholds.
    pub validation: ValidationRules,
}

impl AppConfig {
    /// Load `config.toml` from `dir`; a missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(dir: &DataDir) -> Result<Self> {
        let path = dir.config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ledger.backup_limit == 0 {
            bail!("ledger.backup_limit must be at least 1");
        }
        if self.cache.ttl_ms == 0 {
            bail!("cache.ttl_ms must be positive");
        }
        self.remote.validate().map_err(anyhow::Error::msg)?;
        self.validation.ensure_consistent().map_err(anyhow::Error::msg)?;
        Ok(())
    }
}

/// `[ledger]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Snapshots kept per document.
    pub backup_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backup_limit: worklog_store::DEFAULT_BACKUP_LIMIT,
        }
    }
}

/// `[cache]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached read.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 5_000 }
    }
}

impl CacheConfig {
    /// TTL as a duration.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// `[sync]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per entry after the first rate-limited one.
    pub max_rate_limit_retries: u32,
    /// Wait used when a rate-limited response carries no hint.
    pub default_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 3,
            default_backoff_secs: 5,
        }
    }
}

impl SyncConfig {
    /// Fallback backoff as a duration.
    #[must_use]
    pub const fn default_backoff(&self) -> Duration {
        Duration::from_secs(self.default_backoff_secs)
    }
}
