//! Session-authenticated HTTP client for the remote tracker

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, COOKIE, HeaderMap, RETRY_AFTER, SET_COOKIE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::secrets::SecretProvider;
use crate::types::{IssueResponse, IssueSummary, RemoteSession, RemoteUser, WorklogPayload, remote_id};

const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// Operations the sync pipeline needs from the remote tracker
#[allow(async_fn_in_trait)]
pub trait RemoteWorklogApi {
    /// Check reachability and credentials
    async fn test_connection(&self) -> Result<RemoteUser>;

    /// Create a time entry on `issue_key`, returning the id the remote assigned
    async fn create_remote_entry(
        &self,
        issue_key: &str,
        started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> Result<String>;

    /// Replace an existing time entry
    async fn update_remote_entry(
        &self,
        issue_key: &str,
        remote_entry_id: &str,
        started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> Result<()>;

    /// Delete an existing time entry
    async fn delete_remote_entry(&self, issue_key: &str, remote_entry_id: &str) -> Result<()>;

    /// Fetch summary, status, and assignee of an issue
    async fn fetch_issue(&self, issue_key: &str) -> Result<IssueSummary>;
}

/// HTTP implementation of [`RemoteWorklogApi`]
///
/// Holds at most one session in memory. A session is obtained lazily on the
/// first request and dropped whenever the remote answers 401.
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    secrets: Arc<dyn SecretProvider>,
    session: Mutex<Option<RemoteSession>>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient").field("base", &self.base.as_str()).finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Build a client for `config`, taking credentials from `secrets`.
    ///
    /// # Errors
    /// Returns [`RemoteError::Config`] if the config is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &RemoteConfig, secrets: Arc<dyn SecretProvider>) -> Result<Self> {
        config.validate().map_err(RemoteError::Config)?;
        if !config.is_configured() {
            return Err(RemoteError::Config("remote base_url is not set".into()));
        }
        let base = Url::parse(config.base_url.trim())
            .map_err(|err| RemoteError::Config(format!("invalid base_url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Config(format!("base_url cannot carry a path: {base}")));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| RemoteError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base,
            secrets,
            session: Mutex::new(None),
        })
    }

    /// Whether a session is currently held
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Drop the held session, forcing a login on the next request
    pub async fn logout(&self) {
        if self.session.lock().await.take().is_some() {
            info!("Remote session discarded");
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Config(format!("base_url cannot carry a path: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Current session, logging in if none is held. The flag is true when
    /// the session was already held before this call.
    async fn session(&self) -> Result<(RemoteSession, bool)> {
        let mut held = self.session.lock().await;
        if let Some(session) = held.as_ref() {
            return Ok((session.clone(), true));
        }
        let session = self.login().await?;
        *held = Some(session.clone());
        Ok((session, false))
    }

    async fn login(&self) -> Result<RemoteSession> {
        let credentials = self
            .secrets
            .load_credentials()?
            .ok_or_else(|| RemoteError::Authentication("no remote credentials configured".into()))?;

        let url = self.url(&["auth", "session"])?;
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&LoginBody {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = status.as_u16(), "Remote login rejected");
            return Err(RemoteError::Authentication(format!(
                "login rejected for {} ({status})",
                credentials.username
            )));
        }
        let response = check_status(response).await?;
        let session = RemoteSession {
            cookie: cookie_header(response.headers()),
            credentials,
        };
        info!(
            user = %session.username(),
            cookie = session.has_cookie(),
            "Logged in to remote"
        );
        Ok(session)
    }

    async fn dispatch(
        &self,
        session: &RemoteSession,
        method: &Method,
        url: &Url,
        body: Option<&WorklogPayload>,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        request = match &session.cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request.basic_auth(&session.credentials.username, Some(&session.credentials.password)),
        };
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        self.absorb_cookies(response.headers()).await;
        Ok(response)
    }

    async fn absorb_cookies(&self, headers: &HeaderMap) {
        if let Some(cookie) = cookie_header(headers) {
            let mut held = self.session.lock().await;
            if let Some(session) = held.as_mut() {
                session.cookie = Some(cookie);
                debug!("Remote session refreshed");
            }
        }
    }

    /// Send a request with session handling: one re-login and replay when a
    /// reused session is rejected, never more.
    async fn send(&self, method: Method, url: Url, body: Option<&WorklogPayload>) -> Result<Response> {
        let (session, reused) = self.session().await?;
        let response = self.dispatch(&session, &method, &url, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        self.logout().await;
        if !reused {
            warn!(url = %url.path(), "Fresh remote session rejected");
            return Err(RemoteError::Authentication(
                "remote rejected a freshly established session".into(),
            ));
        }

        warn!(url = %url.path(), "Remote session expired, logging in again");
        let (session, _) = self.session().await?;
        let response = self.dispatch(&session, &method, &url, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.logout().await;
            return Err(RemoteError::Authentication(
                "remote rejected the session after re-authentication".into(),
            ));
        }
        check_status(response).await
    }
}

impl RemoteWorklogApi for RemoteClient {
    async fn test_connection(&self) -> Result<RemoteUser> {
        let response = self.send(Method::GET, self.url(&["myself"])?, None).await?;
        let user: RemoteUser = decode(response).await?;
        info!(user = %user.name, "Remote connection verified");
        Ok(user)
    }

    async fn create_remote_entry(
        &self,
        issue_key: &str,
        started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> Result<String> {
        let payload = WorklogPayload::new(started, duration_seconds, comment)?;
        let url = self.url(&["issue", issue_key, "worklog"])?;
        let response = self.send(Method::POST, url, Some(&payload)).await?;
        let body: serde_json::Value = decode(response).await?;
        let id = remote_id(&body)?;
        info!(issue = issue_key, remote_id = %id, seconds = duration_seconds, "Created remote worklog");
        Ok(id)
    }

    async fn update_remote_entry(
        &self,
        issue_key: &str,
        remote_entry_id: &str,
        started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> Result<()> {
        let payload = WorklogPayload::new(started, duration_seconds, comment)?;
        let url = self.url(&["issue", issue_key, "worklog", remote_entry_id])?;
        self.send(Method::PUT, url, Some(&payload)).await?;
        info!(issue = issue_key, remote_id = remote_entry_id, "Updated remote worklog");
        Ok(())
    }

    async fn delete_remote_entry(&self, issue_key: &str, remote_entry_id: &str) -> Result<()> {
        let url = self.url(&["issue", issue_key, "worklog", remote_entry_id])?;
        self.send(Method::DELETE, url, None).await?;
        info!(issue = issue_key, remote_id = remote_entry_id, "Deleted remote worklog");
        Ok(())
    }

    async fn fetch_issue(&self, issue_key: &str) -> Result<IssueSummary> {
        let mut url = self.url(&["issue", issue_key])?;
        url.query_pairs_mut().append_pair("fields", "summary,status,assignee");
        let response = self.send(Method::GET, url, None).await?;
        let raw: IssueResponse = decode(response).await?;
        debug!(issue = issue_key, "Fetched issue");
        Ok(raw.into())
    }
}

/// Join the name=value pairs of every `Set-Cookie` header.
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(response.headers());
        warn!(?retry_after, "Remote rate limit hit");
        return Err(RemoteError::RateLimited { retry_after });
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let mut messages: Vec<String> = value
            .get("errorMessages")
            .and_then(serde_json::Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(serde_json::Value::as_str)
            .map(str::to_owned)
            .collect();
        if let Some(errors) = value.get("errors").and_then(serde_json::Value::as_object) {
            messages.extend(
                errors
                    .iter()
                    .filter_map(|(field, msg)| msg.as_str().map(|msg| format!("{field}: {msg}"))),
            );
        }
        if !messages.is_empty() {
            return messages.join("; ");
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.canonical_reason().unwrap_or("request failed").to_owned();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| RemoteError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn cookie_header_keeps_only_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("JSESSIONID=abc; Path=/; HttpOnly"));
        headers.append(SET_COOKIE, HeaderValue::from_static("atlassian.xsrf.token=xyz; Secure"));
        assert_eq!(
            cookie_header(&headers).as_deref(),
            Some("JSESSIONID=abc; atlassian.xsrf.token=xyz")
        );
        assert!(cookie_header(&HeaderMap::new()).is_none());
    }

    #[test]
    fn error_message_prefers_structured_errors() {
        let body = r#"{"errorMessages":["Issue does not exist"],"errors":{"timeSpent":"required"}}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "Issue does not exist; timeSpent: required"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_then_reason() {
        let long = "x".repeat(800);
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, &long).len(), MAX_ERROR_BODY);
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "  "), "Bad Gateway");
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
