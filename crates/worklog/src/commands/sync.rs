//! Commands that validate entries or talk to the remote tracker.

use std::io::{IsTerminal, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use worklog_app::{BatchOutcome, FileSecretProvider};
use worklog_core::{SyncStatus, WorklogEntry};
use worklog_remote::{Credentials, RemoteClient, RemoteWorklogApi, SecretProvider, StaticSecrets};

use super::{Workspace, parse_worklog_id};
use crate::{Selection, render};

async fn select(workspace: &Workspace, selection: Selection) -> Result<Vec<WorklogEntry>> {
    if !selection.ids.is_empty() {
        let mut entries = Vec::with_capacity(selection.ids.len());
        for raw in &selection.ids {
            entries.push(workspace.ledger.get(parse_worklog_id(raw)?).await?);
        }
        return Ok(entries);
    }
    let mut entries = workspace.ledger.list().await?;
    entries.retain(|entry| match entry.sync_status {
        SyncStatus::Pending => true,
        SyncStatus::Error => selection.failed,
        SyncStatus::Synced => false,
    });
    Ok(entries)
}

pub(super) async fn validate(workspace: &Workspace, selection: Selection) -> Result<ExitCode> {
    let entries = select(workspace, selection).await?;
    if entries.is_empty() {
        println!("Nothing to validate");
        return Ok(ExitCode::SUCCESS);
    }
    let result = workspace.validator().validate(&entries);
    render::validation(&result);
    Ok(if result.can_sync() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(super) async fn sync(workspace: &Workspace, selection: Selection, assume_yes: bool) -> Result<ExitCode> {
    if assume_yes {
        sync_with(workspace, selection, || Ok(true)).await
    } else {
        sync_with(workspace, selection, confirm_on_terminal).await
    }
}

/// Validate the selection, ask `confirm` when only warnings or infos were
/// found, then push. Nothing is sent when validation reports errors.
async fn sync_with(
    workspace: &Workspace,
    selection: Selection,
    confirm: impl FnOnce() -> Result<bool>,
) -> Result<ExitCode> {
    let entries = select(workspace, selection).await?;
    if entries.is_empty() {
        println!("Nothing to sync");
        return Ok(ExitCode::SUCCESS);
    }

    let findings = workspace.validator().validate(&entries);
    if !findings.is_clean() {
        render::validation(&findings);
    }
    if !findings.can_sync() {
        eprintln!("sync refused: fix the errors above and retry");
        return Ok(ExitCode::FAILURE);
    }
    if !findings.is_clean() && !confirm()? {
        eprintln!("nothing sent; rerun with --yes to send despite the findings above");
        return Ok(ExitCode::FAILURE);
    }

    let driver = workspace.driver()?;

    // Ctrl-C stops the batch after the entry in flight.
    let cancel = driver.cancel_flag();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let outcome = driver.run_sync_batch(&entries, &mut render::progress).await;
    watcher.abort();

    match outcome {
        BatchOutcome::Refused(result) => {
            render::validation(&result);
            eprintln!("sync refused: fix the errors above and retry");
            Ok(ExitCode::FAILURE)
        }
        BatchOutcome::Completed(report) => {
            render::report(&report);
            Ok(if report.is_complete_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Ask on the terminal whether to send despite warnings. Without a terminal
/// the answer is no.
fn confirm_on_terminal() -> Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    eprint!("Send anyway? [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    stdin.read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub(super) async fn ping(workspace: &Workspace) -> Result<()> {
    let user = workspace.remote()?.test_connection().await?;
    println!("connected as {} ({})", user.display_name, user.name);
    Ok(())
}

pub(super) async fn issue(workspace: &Workspace, key: &str) -> Result<()> {
    let issue = workspace.remote()?.fetch_issue(key.trim()).await?;
    println!("{}: {}", issue.key, issue.summary);
    println!("status: {}", issue.status.as_deref().unwrap_or("-"));
    println!("assignee: {}", issue.assignee.as_deref().unwrap_or("-"));
    Ok(())
}

/// Store credentials, checking them first when a remote is configured.
pub(super) async fn login(workspace: &Workspace, user: String, token: String) -> Result<()> {
    let credentials = Credentials::new(user.trim(), token);
    if workspace.config.remote.is_configured() {
        let probe = RemoteClient::new(
            &workspace.config.remote,
            Arc::new(StaticSecrets::new(credentials.clone())),
        )?;
        let account = probe
            .test_connection()
            .await
            .context("credentials were not accepted; nothing saved")?;
        println!("authenticated as {}", account.display_name);
    }
    let provider = FileSecretProvider::new(workspace.dir.credentials_path());
    provider.save_credentials(&credentials)?;
    println!("credentials saved to {}", provider.path().display());
    Ok(())
}

pub(super) fn logout(workspace: &Workspace) -> Result<()> {
    let provider = FileSecretProvider::new(workspace.dir.credentials_path());
    if provider.clear()? {
        println!("removed {}", provider.path().display());
    } else {
        println!("no stored credentials");
    }
    Ok(())
}
