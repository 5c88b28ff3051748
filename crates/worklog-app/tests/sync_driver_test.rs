#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use time::macros::time;
use time::{Date, OffsetDateTime, Time, UtcOffset};
use worklog_app::{BatchOutcome, SyncConfig, SyncDriver, SyncError, SyncProgress};
use worklog_core::{
    IssueCode, NewWorklog, SyncStatus, TaskId, ValidationRules, Validator, WorklogEntry, clock,
};
use worklog_remote::{IssueSummary, RemoteError, RemoteUser, RemoteWorklogApi};
use worklog_store::{LedgerStore, ResourceGate};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    method: &'static str,
    issue_key: String,
    remote_id: Option<String>,
    seconds: u64,
    comment: String,
}

/// Scripted remote: per-issue queues of failures, success otherwise.
#[derive(Default)]
struct MockRemote {
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u32>,
    after_create: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockRemote {
    fn fail(&self, issue_key: &str, err: RemoteError) {
        self.failures
            .lock()
            .unwrap()
            .entry(issue_key.to_owned())
            .or_default()
            .push_back(err);
    }

    /// Run `hook` once, right after the next successful create.
    fn after_create(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_create.lock().unwrap() = Some(Box::new(hook));
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn scripted_failure(&self, issue_key: &str) -> Option<RemoteError> {
        self.failures
            .lock()
            .unwrap()
            .get_mut(issue_key)
            .and_then(VecDeque::pop_front)
    }
}

impl RemoteWorklogApi for MockRemote {
    async fn test_connection(&self) -> worklog_remote::Result<RemoteUser> {
        Err(RemoteError::Config("not used".into()))
    }

    async fn create_remote_entry(
        &self,
        issue_key: &str,
        _started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> worklog_remote::Result<String> {
        self.calls.lock().unwrap().push(Call {
            method: "create",
            issue_key: issue_key.to_owned(),
            remote_id: None,
            seconds: duration_seconds,
            comment: comment.to_owned(),
        });
        if let Some(err) = self.scripted_failure(issue_key) {
            return Err(err);
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("{}", 10_000 + *next)
        };
        if let Some(hook) = self.after_create.lock().unwrap().take() {
            hook();
        }
        Ok(id)
    }

    async fn update_remote_entry(
        &self,
        issue_key: &str,
        remote_entry_id: &str,
        _started: OffsetDateTime,
        duration_seconds: u64,
        comment: &str,
    ) -> worklog_remote::Result<()> {
        self.calls.lock().unwrap().push(Call {
            method: "update",
            issue_key: issue_key.to_owned(),
            remote_id: Some(remote_entry_id.to_owned()),
            seconds: duration_seconds,
            comment: comment.to_owned(),
        });
        self.scripted_failure(issue_key).map_or(Ok(()), Err)
    }

    async fn delete_remote_entry(&self, _issue_key: &str, _remote_entry_id: &str) -> worklog_remote::Result<()> {
        Ok(())
    }

    async fn fetch_issue(&self, _issue_key: &str) -> worklog_remote::Result<IssueSummary> {
        Err(RemoteError::Config("not used".into()))
    }
}

struct Fixture {
    temp: TempDir,
    ledger: LedgerStore,
    today: Date,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let ledger = LedgerStore::open(temp.path().join("worklogs.json"), ResourceGate::new());
        Self {
            temp,
            ledger,
            today: clock::local_today(),
        }
    }

    async fn add(&self, key: Option<&str>, start: Time, end: Time, description: &str) -> WorklogEntry {
        let mut draft = NewWorklog::spanning(TaskId::new(), self.today, start, end)
            .with_description(description)
            .with_task_title("Reconciliation");
        if let Some(key) = key {
            draft = draft.with_issue_key(key);
        }
        self.ledger.append(draft).await.unwrap()
    }

    fn driver(&self, remote: MockRemote, settings: SyncConfig) -> SyncDriver<MockRemote> {
        SyncDriver::new(self.ledger.clone(), remote, Validator::new(ValidationRules::default()), settings)
            .with_offset(UtcOffset::UTC)
    }
}

fn quick_backoff() -> SyncConfig {
    SyncConfig {
        max_rate_limit_retries: 2,
        default_backoff_secs: 0,
    }
}

fn completed(outcome: BatchOutcome) -> worklog_app::SyncReport {
    match outcome {
        BatchOutcome::Completed(report) => report,
        BatchOutcome::Refused(result) => panic!("batch refused: {result:?}"),
    }
}

#[tokio::test]
async fn every_entry_is_attempted_despite_failures() {
    let fx = Fixture::new();
    let first = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;
    let second = fx.add(Some("PROJ-2"), time!(10:00), time!(11:00), "Fixed mapping of statuses").await;
    let third = fx.add(Some("PROJ-3"), time!(11:00), time!(12:00), "Paired on the sync retry code").await;

    let remote = MockRemote::default();
    remote.fail(
        "PROJ-2",
        RemoteError::Rejected {
            status: 400,
            message: "Worklog must not be null".into(),
        },
    );
    let driver = fx.driver(remote, quick_backoff());

    let entries = fx.ledger.list().await.unwrap();
    let mut seen = Vec::new();
    let report = completed(driver.run_sync_batch(&entries, &mut |p: SyncProgress| seen.push(p)).await);

    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.skipped_count, 0);
    assert_eq!(driver.remote().calls().len(), 3);
    assert_eq!(
        seen.iter().map(|p| (p.current, p.total)).collect::<Vec<_>>(),
        vec![(1, 3), (2, 3), (3, 3)]
    );

    let first = fx.ledger.get(first.id).await.unwrap();
    assert_eq!(first.sync_status, SyncStatus::Synced);
    assert!(first.remote_entry_id.is_some());

    let second = fx.ledger.get(second.id).await.unwrap();
    assert_eq!(second.sync_status, SyncStatus::Error);
    assert!(second.error_message.unwrap().contains("Worklog must not be null"));
    assert!(second.remote_entry_id.is_none());

    assert_eq!(fx.ledger.get(third.id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn blocking_validation_refuses_without_remote_calls() {
    let fx = Fixture::new();
    fx.add(Some("PROJ-1"), time!(9:00), time!(10:30), "Reviewed import logs").await;
    fx.add(Some("PROJ-2"), time!(10:00), time!(11:00), "Fixed mapping of statuses").await;

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    let entries = fx.ledger.list().await.unwrap();
    let outcome = driver.run_sync_batch(&entries, &mut |_| {}).await;

    let BatchOutcome::Refused(result) = outcome else {
        panic!("overlapping entries must block the batch");
    };
    assert!(!result.can_sync());
    assert!(result.has_code(IssueCode::TimeOverlap));
    assert!(driver.remote().calls().is_empty());
    assert!(
        fx.ledger
            .list()
            .await
            .unwrap()
            .iter()
            .all(|e| e.sync_status == SyncStatus::Pending)
    );

    let err = driver.run_sync_batch(&entries, &mut |_| {}).await.into_report().unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn missing_issue_key_is_marked_locally() {
    let fx = Fixture::new();
    let keyless = fx.add(None, time!(9:00), time!(10:00), "Planning the next sprint").await;

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    let report = completed(driver.sync_pending(&mut |_| {}).await.unwrap());

    assert!(report.validation.has_code(IssueCode::MissingIssueKey));
    assert_eq!(report.failure_count, 1);
    assert!(driver.remote().calls().is_empty());
    let stored = fx.ledger.get(keyless.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert_eq!(stored.error_message.as_deref(), Some(worklog_app::sync_driver::MISSING_KEY_MESSAGE));
}

#[tokio::test]
async fn rate_limit_is_retried_then_succeeds() {
    let fx = Fixture::new();
    let entry = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;

    let remote = MockRemote::default();
    remote.fail("PROJ-1", RemoteError::RateLimited { retry_after: Some(Duration::from_millis(5)) });
    remote.fail("PROJ-1", RemoteError::RateLimited { retry_after: None });
    let driver = fx.driver(remote, quick_backoff());

    let report = completed(driver.sync_pending(&mut |_| {}).await.unwrap());
    assert_eq!(report.success_count, 1);
    assert_eq!(driver.remote().calls().len(), 3);
    assert_eq!(fx.ledger.get(entry.id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn rate_limit_beyond_retry_budget_marks_error() {
    let fx = Fixture::new();
    let entry = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail("PROJ-1", RemoteError::RateLimited { retry_after: None });
    }
    let driver = fx.driver(remote, quick_backoff());

    let report = completed(driver.sync_pending(&mut |_| {}).await.unwrap());
    assert_eq!(report.failure_count, 1);
    assert_eq!(driver.remote().calls().len(), 3);
    let stored = fx.ledger.get(entry.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(stored.error_message.unwrap().contains("Rate limited"));
}

#[tokio::test]
async fn cancellation_skips_remaining_entries() {
    let fx = Fixture::new();
    fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;
    fx.add(Some("PROJ-2"), time!(10:00), time!(11:00), "Fixed mapping of statuses").await;
    fx.add(Some("PROJ-3"), time!(11:00), time!(12:00), "Paired on the sync retry code").await;

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    let cancel = driver.cancel_flag();
    let entries = fx.ledger.list().await.unwrap();
    let report = completed(
        driver
            .run_sync_batch(&entries, &mut |p: SyncProgress| {
                if p.current == 2 {
                    cancel.cancel();
                }
            })
            .await,
    );

    assert_eq!(report.success_count, 2);
    assert_eq!(report.skipped_count, 1);
    assert_eq!(fx.ledger.list_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn entries_are_sent_in_display_order_with_current_content() {
    let fx = Fixture::new();
    let late = fx.add(Some("PROJ-2"), time!(14:00), time!(15:00), "Afternoon review session").await;
    let early = fx.add(Some("PROJ-1"), time!(8:00), time!(9:30), "Morning triage of reports").await;
    let entries = fx.ledger.list().await.unwrap();

    fx.ledger
        .update(
            late.id,
            worklog_core::WorklogPatch {
                description: Some("Afternoon review of the importer".into()),
                ..worklog_core::WorklogPatch::default()
            },
        )
        .await
        .unwrap();

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    completed(driver.run_sync_batch(&entries, &mut |_| {}).await);

    let calls = driver.remote().calls();
    assert_eq!(calls[0].issue_key, "PROJ-1");
    assert_eq!(calls[0].seconds, 5400);
    assert_eq!(calls[1].comment, "Afternoon review of the importer");
    assert_eq!(fx.ledger.get(early.id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn deleted_entry_counts_as_failure() {
    let fx = Fixture::new();
    let gone = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;
    let kept = fx.add(Some("PROJ-2"), time!(10:00), time!(11:00), "Fixed mapping of statuses").await;
    let entries = fx.ledger.list().await.unwrap();
    fx.ledger.delete(gone.id).await.unwrap();

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    let report = completed(driver.run_sync_batch(&entries, &mut |_| {}).await);

    assert_eq!(report.failure_count, 1);
    assert_eq!(report.success_count, 1);
    let failed = report.outcomes.iter().find(|o| o.id == gone.id).unwrap();
    assert!(matches!(&failed.result, Err(SyncError::Store(err)) if err.is_not_found()));
    assert_eq!(fx.ledger.get(kept.id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn previously_synced_entry_is_updated_not_duplicated() {
    let fx = Fixture::new();
    let entry = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;
    fx.ledger.mark_synced(entry.id, "20001").await.unwrap();
    let failed = fx.ledger.mark_error(entry.id, "remote timeout").await.unwrap();

    let driver = fx.driver(MockRemote::default(), quick_backoff());
    let report = completed(driver.run_sync_batch(&[failed], &mut |_| {}).await);

    assert_eq!(report.success_count, 1);
    let calls = driver.remote().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "update");
    assert_eq!(calls[0].remote_id.as_deref(), Some("20001"));
    let stored = fx.ledger.get(entry.id).await.unwrap();
    assert_eq!(stored.remote_entry_id.as_deref(), Some("20001"));
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn authentication_failure_does_not_abort_batch() {
    let fx = Fixture::new();
    fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;
    fx.add(Some("PROJ-2"), time!(10:00), time!(11:00), "Fixed mapping of statuses").await;

    let remote = MockRemote::default();
    remote.fail("PROJ-1", RemoteError::Authentication("session expired".into()));
    remote.fail("PROJ-2", RemoteError::Authentication("session expired".into()));
    let driver = fx.driver(remote, quick_backoff());

    let report = completed(driver.sync_pending(&mut |_| {}).await.unwrap());
    assert_eq!(report.failure_count, 2);
    assert_eq!(driver.remote().calls().len(), 2);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| matches!(&o.result, Err(SyncError::Remote(e)) if e.is_authentication()))
    );
}

#[tokio::test]
async fn remote_id_is_surfaced_when_the_ledger_cannot_record_it() {
    let fx = Fixture::new();
    let entry = fx.add(Some("PROJ-1"), time!(9:00), time!(10:00), "Reviewed import logs").await;

    // A directory where the ledger's temp file goes makes every write fail
    // while reads keep working.
    let blocker = fx.temp.path().join("worklogs.json.tmp");
    let remote = MockRemote::default();
    let hook_target = blocker.clone();
    remote.after_create(move || std::fs::create_dir(&hook_target).unwrap());
    let driver = fx.driver(remote, quick_backoff());

    let report = completed(driver.sync_pending(&mut |_| {}).await.unwrap());
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.success_count, 0);
    let outcome = &report.outcomes[0];
    match &outcome.result {
        Err(SyncError::Unrecorded { remote_id, source }) => {
            assert_eq!(remote_id, "10001");
            assert!(!source.is_not_found());
        }
        other => panic!("expected an unrecorded remote entry, got {other:?}"),
    }
    assert!(outcome.result.as_ref().unwrap_err().to_string().contains("10001"));

    std::fs::remove_dir(&blocker).unwrap();
    let stored = fx.ledger.get(entry.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert!(stored.remote_entry_id.is_none());
    assert_eq!(driver.remote().calls().len(), 1);
}
