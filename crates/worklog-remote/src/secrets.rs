//! Credential source seam

use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::types::Credentials;

/// Opaque store for remote credentials
///
/// The client only ever asks for the current pair; how it is kept at rest is
/// up to the implementation.
pub trait SecretProvider: Send + Sync {
    /// Current credentials, or `None` when nothing is configured.
    ///
    /// # Errors
    /// Returns [`crate::RemoteError::Secrets`] if the backing store fails.
    fn load_credentials(&self) -> Result<Option<Credentials>>;

    /// Replace the stored credentials.
    ///
    /// # Errors
    /// Returns [`crate::RemoteError::Secrets`] if the provider cannot store
    /// credentials.
    fn save_credentials(&self, credentials: &Credentials) -> Result<()>;
}

/// Credentials held in memory
#[derive(Debug, Default)]
pub struct StaticSecrets {
    credentials: Mutex<Option<Credentials>>,
}

impl StaticSecrets {
    /// Provider holding `credentials`
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }

    /// Provider with nothing configured
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl SecretProvider for StaticSecrets {
    fn load_credentials(&self) -> Result<Option<Credentials>> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        *self.credentials.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }
}
