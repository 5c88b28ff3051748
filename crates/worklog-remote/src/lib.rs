//! Client for the remote issue tracker that time entries are reconciled with.
//!
//! The client authenticates lazily with a session cookie obtained from the
//! credentials of a [`SecretProvider`], falls back to basic auth when the
//! remote does not issue cookies, and surfaces rate limiting to the caller
//! instead of retrying on its own.

mod client;
mod config;
mod error;
mod secrets;
mod types;

pub use client::{RemoteClient, RemoteWorklogApi};
pub use config::RemoteConfig;
pub use error::{RemoteError, Result};
pub use secrets::{SecretProvider, StaticSecrets};
pub use types::{Credentials, IssueSummary, RemoteSession, RemoteUser, WorklogPayload, format_started};
