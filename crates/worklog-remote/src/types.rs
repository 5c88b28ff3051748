//! Types exchanged with the remote tracker

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::error::{RemoteError, Result};

const STARTED_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].000[offset_hour sign:mandatory][offset_minute]"
);

/// Username and password (or API token) for the remote
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password or API token
    pub password: String,
}

impl Credentials {
    /// Build a credential pair
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// In-memory authentication state; never persisted
#[derive(Clone)]
pub struct RemoteSession {
    pub(crate) cookie: Option<String>,
    pub(crate) credentials: Credentials,
}

impl RemoteSession {
    /// Whether the remote issued a session cookie (as opposed to basic auth)
    #[must_use]
    pub const fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }

    /// User the session belongs to
    #[must_use]
    pub fn username(&self) -> &str {
        &self.credentials.username
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSession")
            .field("username", &self.credentials.username)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Account returned by the connection test
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    /// Login name
    #[serde(default)]
    pub name: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
}

/// Summary of a remote issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSummary {
    /// Issue key
    pub key: String,
    /// One-line summary
    pub summary: String,
    /// Workflow status name
    pub status: Option<String>,
    /// Assignee display name
    pub assignee: Option<String>,
}

/// Raw issue document as returned by the remote
#[derive(Debug, Deserialize)]
pub struct IssueResponse {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueFields {
    #[serde(default)]
    summary: String,
    status: Option<Named>,
    assignee: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    display_name: Option<String>,
    name: Option<String>,
}

impl From<IssueResponse> for IssueSummary {
    fn from(raw: IssueResponse) -> Self {
        Self {
            key: raw.key,
            summary: raw.fields.summary,
            status: raw.fields.status.map(|s| s.name),
            assignee: raw.fields.assignee.and_then(|p| p.display_name.or(p.name)),
        }
    }
}

/// Body of a create or update worklog request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogPayload {
    /// Start timestamp, `YYYY-MM-DDTHH:MM:SS.000±HHMM`
    pub started: String,
    /// Logged duration
    pub time_spent_seconds: u64,
    /// Description
    pub comment: String,
}

impl WorklogPayload {
    /// Build a payload
    ///
    /// # Errors
    /// Returns [`RemoteError::Decode`] if the timestamp cannot be formatted.
    pub fn new(started: OffsetDateTime, time_spent_seconds: u64, comment: &str) -> Result<Self> {
        Ok(Self {
            started: format_started(started)?,
            time_spent_seconds,
            comment: comment.to_owned(),
        })
    }
}

/// Format a start timestamp the way the remote expects it
///
/// # Errors
/// Returns [`RemoteError::Decode`] if formatting fails.
pub fn format_started(started: OffsetDateTime) -> Result<String> {
    started
        .format(STARTED_FORMAT)
        .map_err(|err| RemoteError::Decode(format!("cannot format start time: {err}")))
}

/// Pull the assigned id out of a create response; the remote may send it as
/// a string or a number.
pub fn remote_id(body: &serde_json::Value) -> Result<String> {
    match body.get("id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
        _ => Err(RemoteError::Decode("create response carries no worklog id".into())),
    }
}
