//! Remote endpoint configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;
use worklog_core::clock;

/// Connection settings for the remote issue tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST API root, e.g. `https://tracker.example.com/rest/api/2`
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Offset used to turn local wall-clock starts into timestamps.
    /// Falls back to the system offset when unset.
    pub utc_offset_minutes: Option<i16>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            utc_offset_minutes: None,
        }
    }
}

impl RemoteConfig {
    /// Config pointing at `base_url` with default settings
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Whether a remote has been configured at all
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    /// Request timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Offset applied to entry start times
    #[must_use]
    pub fn offset(&self) -> UtcOffset {
        self.utc_offset_minutes
            .and_then(|minutes| UtcOffset::from_whole_seconds(i32::from(minutes) * 60).ok())
            .unwrap_or_else(clock::local_offset)
    }

    /// Check the settings for obvious mistakes
    ///
    /// # Errors
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_configured() {
            let url = self.base_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("remote base_url must be an http(s) URL: {url}"));
            }
        }
        if self.timeout_secs == 0 {
            return Err("remote timeout_secs must be positive".into());
        }
        if let Some(minutes) = self.utc_offset_minutes
            && !(-18 * 60..=18 * 60).contains(&minutes)
        {
            return Err(format!("remote utc_offset_minutes out of range: {minutes}"));
        }
        Ok(())
    }
}
