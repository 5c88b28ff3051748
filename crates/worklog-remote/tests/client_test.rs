#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use time::macros::datetime;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use worklog_remote::{
    Credentials, RemoteClient, RemoteConfig, RemoteError, RemoteWorklogApi, StaticSecrets,
};

#[derive(Default)]
struct Tracker {
    logins: AtomicUsize,
    issued: AtomicUsize,
    valid_cookie: Mutex<Option<String>>,
    expire_next: AtomicBool,
    reject_all: AtomicBool,
    no_cookies: AtomicBool,
    rotate_next: AtomicBool,
    cookies_seen: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

impl Tracker {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all.load(Ordering::SeqCst) {
            return false;
        }
        if self.expire_next.swap(false, Ordering::SeqCst) {
            *self.valid_cookie.lock().unwrap() = None;
            return false;
        }
        if self.no_cookies.load(Ordering::SeqCst) {
            return headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("Basic "));
        }
        let sent = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
        let valid = self.valid_cookie.lock().unwrap().clone();
        matches!((sent, valid), (Some(sent), Some(valid)) if sent == valid)
    }
}

type Shared = Arc<Tracker>;

async fn login(State(tracker): State<Shared>, Json(body): Json<Value>) -> Response {
    tracker.logins.fetch_add(1, Ordering::SeqCst);
    if body["password"] != "secret" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if tracker.no_cookies.load(Ordering::SeqCst) {
        return Json(json!({"session": {}})).into_response();
    }
    let n = tracker.issued.fetch_add(1, Ordering::SeqCst) + 1;
    let cookie = format!("SID={n}");
    *tracker.valid_cookie.lock().unwrap() = Some(cookie.clone());
    (
        [(header::SET_COOKIE, format!("{cookie}; Path=/; HttpOnly"))],
        Json(json!({"session": {"name": "SID", "value": n}})),
    )
        .into_response()
}

async fn myself(State(tracker): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(sent) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        tracker.cookies_seen.lock().unwrap().push(sent.to_owned());
    }
    if !tracker.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let body = Json(json!({"name": "alice", "displayName": "Alice Example"}));
    if tracker.rotate_next.swap(false, Ordering::SeqCst) {
        // Replace the session cookie on an ordinary response.
        let n = tracker.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let cookie = format!("SID={n}");
        *tracker.valid_cookie.lock().unwrap() = Some(cookie.clone());
        return ([(header::SET_COOKIE, format!("{cookie}; Path=/; HttpOnly"))], body).into_response();
    }
    body.into_response()
}

async fn create_worklog(
    State(tracker): State<Shared>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !tracker.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match key.as_str() {
        "LIMIT-1" => (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "3")]).into_response(),
        "GONE-1" => (
            StatusCode::NOT_FOUND,
            Json(json!({"errorMessages": ["Issue does not exist or you do not have permission to see it."], "errors": {}})),
        )
            .into_response(),
        _ => {
            tracker.bodies.lock().unwrap().push(body);
            (StatusCode::CREATED, Json(json!({"id": 10042, "issueId": "1"}))).into_response()
        }
    }
}

async fn update_worklog(
    State(tracker): State<Shared>,
    Path((_key, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !tracker.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    tracker.bodies.lock().unwrap().push(body);
    Json(json!({"id": id})).into_response()
}

async fn delete_worklog(
    State(tracker): State<Shared>,
    Path((_key, _id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !tracker.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn issue(State(tracker): State<Shared>, Path(key): Path<String>, headers: HeaderMap) -> Response {
    if !tracker.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "key": key,
        "fields": {
            "summary": "Import pipeline",
            "status": {"name": "In Progress"},
            "assignee": null
        }
    }))
    .into_response()
}

async fn spawn_tracker(tracker: Shared) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/rest/auth/session", post(login))
        .route("/rest/myself", get(myself))
        .route("/rest/issue/{key}", get(issue))
        .route("/rest/issue/{key}/worklog", post(create_worklog))
        .route(
            "/rest/issue/{key}/worklog/{id}",
            put(update_worklog).delete(delete_worklog),
        )
        .with_state(tracker);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind tracker mock");
    let addr = listener.local_addr().expect("tracker mock addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve tracker mock");
    });
    (format!("http://{addr}/rest"), handle)
}

fn client(base: &str, password: &str) -> RemoteClient {
    let secrets = Arc::new(StaticSecrets::new(Credentials::new("alice", password)));
    RemoteClient::new(&RemoteConfig::new(base), secrets).unwrap()
}

#[tokio::test]
async fn login_happens_once_and_session_is_reused() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    let user = client.test_connection().await.unwrap();
    assert_eq!(user.display_name, "Alice Example");
    client.test_connection().await.unwrap();
    client.fetch_issue("PROJ-1").await.unwrap();

    assert_eq!(tracker.logins.load(Ordering::SeqCst), 1);
    assert!(client.has_session().await);
    server.abort();
}

#[tokio::test]
async fn rotated_cookie_is_sent_on_the_next_request() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    client.test_connection().await.unwrap();
    tracker.rotate_next.store(true, Ordering::SeqCst);
    client.test_connection().await.unwrap();
    // The old cookie is no longer valid, so this only passes with the new one.
    client.test_connection().await.unwrap();

    assert_eq!(
        tracker.cookies_seen.lock().unwrap().clone(),
        vec!["SID=1".to_owned(), "SID=1".to_owned(), "SID=2".to_owned()]
    );
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 1);
    server.abort();
}

#[tokio::test]
async fn create_sends_payload_and_returns_numeric_id_as_string() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    let id = client
        .create_remote_entry("PROJ-7", datetime!(2024-05-06 9:30 +3), 5400, "Reviewed import")
        .await
        .unwrap();
    assert_eq!(id, "10042");

    let bodies = tracker.bodies.lock().unwrap().clone();
    assert_eq!(
        bodies[0],
        json!({
            "started": "2024-05-06T09:30:00.000+0300",
            "timeSpentSeconds": 5400,
            "comment": "Reviewed import"
        })
    );
    server.abort();
}

#[tokio::test]
async fn expired_session_is_renewed_once_and_request_replayed() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    client.test_connection().await.unwrap();
    tracker.expire_next.store(true, Ordering::SeqCst);

    let id = client
        .create_remote_entry("PROJ-7", datetime!(2024-05-06 9:30 UTC), 600, "Standup")
        .await
        .unwrap();
    assert_eq!(id, "10042");
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 2);
    server.abort();
}

#[tokio::test]
async fn persistent_unauthorized_stops_after_one_relogin() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    client.test_connection().await.unwrap();
    tracker.reject_all.store(true, Ordering::SeqCst);

    let err = client.test_connection().await.unwrap_err();
    assert!(matches!(err, RemoteError::Authentication(_)));
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 2);
    assert!(!client.has_session().await);
    server.abort();
}

#[tokio::test]
async fn fresh_session_rejected_is_not_retried() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    tracker.reject_all.store(true, Ordering::SeqCst);
    let client = client(&base, "secret");

    let err = client.fetch_issue("PROJ-1").await.unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 1);
    server.abort();
}

#[tokio::test]
async fn wrong_password_is_an_authentication_error() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "nope");

    let err = client.test_connection().await.unwrap_err();
    assert!(matches!(err, RemoteError::Authentication(_)));
    assert!(!client.has_session().await);
    server.abort();
}

#[tokio::test]
async fn missing_credentials_fail_without_network_login() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = RemoteClient::new(&RemoteConfig::new(&base), Arc::new(StaticSecrets::empty())).unwrap();

    assert!(client.test_connection().await.unwrap_err().is_authentication());
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 0);
    server.abort();
}

#[tokio::test]
async fn rate_limit_is_surfaced_with_retry_hint() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    let err = client
        .create_remote_entry("LIMIT-1", datetime!(2024-05-06 9:30 UTC), 600, "Standup")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RemoteError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
    ));
    assert!(err.is_retryable());
    assert!(client.has_session().await);
    server.abort();
}

#[tokio::test]
async fn rejection_carries_remote_error_messages() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    let err = client
        .create_remote_entry("GONE-1", datetime!(2024-05-06 9:30 UTC), 600, "Standup")
        .await
        .unwrap_err();
    match err {
        RemoteError::Rejected { status, message } => {
            assert_eq!(status, 404);
            assert!(message.starts_with("Issue does not exist"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.abort();
}

#[tokio::test]
async fn basic_auth_fallback_when_no_cookie_issued() {
    let tracker = Shared::default();
    tracker.no_cookies.store(true, Ordering::SeqCst);
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    client.test_connection().await.unwrap();
    client.update_remote_entry("PROJ-7", "10042", datetime!(2024-05-06 9:30 UTC), 900, "Edited").await.unwrap();
    client.delete_remote_entry("PROJ-7", "10042").await.unwrap();
    assert_eq!(tracker.logins.load(Ordering::SeqCst), 1);
    server.abort();
}

#[tokio::test]
async fn issue_summary_is_mapped() {
    let tracker = Shared::default();
    let (base, server) = spawn_tracker(Arc::clone(&tracker)).await;
    let client = client(&base, "secret");

    let summary = client.fetch_issue("PROJ-9").await.unwrap();
    assert_eq!(summary.key, "PROJ-9");
    assert_eq!(summary.summary, "Import pipeline");
    assert_eq!(summary.status.as_deref(), Some("In Progress"));
    assert!(summary.assignee.is_none());
    server.abort();
}
