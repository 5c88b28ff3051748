//! Credential providers backed by the environment and a local file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use worklog_remote::{Credentials, RemoteError, SecretProvider};

/// Environment variable holding the remote login name.
pub const ENV_REMOTE_USER: &str = "WORKLOG_REMOTE_USER";
/// Environment variable holding the remote password or API token.
pub const ENV_REMOTE_TOKEN: &str = "WORKLOG_REMOTE_TOKEN";

/// Reads credentials from `WORKLOG_REMOTE_USER` and `WORKLOG_REMOTE_TOKEN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretProvider;

impl EnvSecretProvider {
    fn load_with(fetch: &mut impl FnMut(&'static str) -> Option<String>) -> Option<Credentials> {
        let username = env_value_with(ENV_REMOTE_USER, fetch)?;
        let password = env_value_with(ENV_REMOTE_TOKEN, fetch)?;
        Some(Credentials::new(username, password))
    }
}

fn env_value_with(
    key: &'static str,
    fetch: &mut impl FnMut(&'static str) -> Option<String>,
) -> Option<String> {
    fetch(key).filter(|value| !value.trim().is_empty())
}

impl SecretProvider for EnvSecretProvider {
    fn load_credentials(&self) -> worklog_remote::Result<Option<Credentials>> {
        Ok(Self::load_with(&mut |key| std::env::var(key).ok()))
    }

    fn save_credentials(&self, _credentials: &Credentials) -> worklog_remote::Result<()> {
        Err(RemoteError::Secrets(
            "environment credentials are read-only".into(),
        ))
    }
}

/// Stores credentials as JSON in a file readable only by the owner.
#[derive(Debug, Clone)]
pub struct FileSecretProvider {
    path: PathBuf,
}

impl FileSecretProvider {
    /// Provider for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Credential file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the stored credentials. Returns false when there was nothing to remove.
    ///
    /// # Errors
    /// Returns [`RemoteError::Secrets`] if the file exists but cannot be removed.
    pub fn clear(&self) -> worklog_remote::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(secrets_error(&self.path, &err)),
        }
    }
}

fn secrets_error(path: &Path, err: &dyn std::fmt::Display) -> RemoteError {
    RemoteError::Secrets(format!("{}: {err}", path.display()))
}

impl SecretProvider for FileSecretProvider {
    fn load_credentials(&self) -> worklog_remote::Result<Option<Credentials>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No credential file");
                return Ok(None);
            }
            Err(err) => return Err(secrets_error(&self.path, &err)),
        };
        let credentials: Credentials =
            serde_json::from_str(&contents).map_err(|err| secrets_error(&self.path, &err))?;
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    fn save_credentials(&self, credentials: &Credentials) -> worklog_remote::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| secrets_error(parent, &err))?;
        }
        let content =
            serde_json::to_string_pretty(credentials).map_err(|err| secrets_error(&self.path, &err))?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            // New files are owner-only from creation; an existing file is
            // tightened before the secret lands in it.
            options.mode(0o600);
            if self.path.exists() {
                fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                    .map_err(|err| secrets_error(&self.path, &err))?;
            }
        }
        let mut file = options.open(&self.path).map_err(|err| secrets_error(&self.path, &err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| secrets_error(&self.path, &err))?;

        info!(path = %self.path.display(), user = %credentials.username, "Saved remote credentials");
        Ok(())
    }
}

/// Tries each provider in order; saving goes to the first provider that accepts it.
pub struct ChainedSecrets {
    providers: Vec<Box<dyn SecretProvider>>,
}

impl std::fmt::Debug for ChainedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedSecrets")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl ChainedSecrets {
    /// Chain `providers`, consulted front to back.
    #[must_use]
    pub fn new(providers: Vec<Box<dyn SecretProvider>>) -> Self {
        Self { providers }
    }

    /// Environment first, then the credential file at `path`.
    #[must_use]
    pub fn standard(path: impl Into<PathBuf>) -> Self {
        Self::new(vec![
            Box::new(EnvSecretProvider),
            Box::new(FileSecretProvider::new(path)),
        ])
    }
}

impl SecretProvider for ChainedSecrets {
    fn load_credentials(&self) -> worklog_remote::Result<Option<Credentials>> {
        for provider in &self.providers {
            if let Some(credentials) = provider.load_credentials()? {
                return Ok(Some(credentials));
            }
        }
        Ok(None)
    }

    fn save_credentials(&self, credentials: &Credentials) -> worklog_remote::Result<()> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.save_credentials(credentials) {
                Ok(()) => return Ok(()),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| RemoteError::Secrets("no credential store configured".into())))
    }
}
