use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use time::{Date, OffsetDateTime, Time};
use worklog_app::{
    AppConfig, CachedTaskRepository, ChainedSecrets, ChangeSignal, DataDir, SyncDriver,
};
use worklog_core::clock::{self, minutes_between};
use worklog_core::{
    NewWorklog, SyncStatus, TaskRecord, Validator, WorklogEntry, WorklogId, WorklogPatch,
};
use worklog_remote::{RemoteClient, RemoteWorklogApi, SecretProvider};
use worklog_store::{LedgerStore, ResourceGate, TaskStore};

use crate::render;
use crate::{Command, ListArgs};

mod sync;

/// Everything a command needs, resolved from the data directory.
#[derive(Debug)]
pub struct Workspace {
    dir: DataDir,
    config: AppConfig,
    ledger: LedgerStore,
    tasks: CachedTaskRepository,
}

impl Workspace {
    pub fn open(home: Option<PathBuf>) -> Result<Self> {
        let dir = match home {
            Some(path) => DataDir::new(path),
            None => DataDir::discover()?,
        };
        let config = AppConfig::load(&dir)?;
        let gate = ResourceGate::new();
        let ledger = LedgerStore::open(dir.ledger_path(), gate.clone())
            .with_backup_limit(config.ledger.backup_limit);
        let task_store =
            TaskStore::open(dir.tasks_path(), gate).with_backup_limit(config.ledger.backup_limit);
        let tasks = CachedTaskRepository::new(task_store, config.cache.ttl(), &ChangeSignal::new());
        Ok(Self {
            dir,
            config,
            ledger,
            tasks,
        })
    }

    fn validator(&self) -> Validator {
        Validator::new(self.config.validation.clone())
    }

    fn secrets(&self) -> Arc<dyn SecretProvider> {
        Arc::new(ChainedSecrets::standard(self.dir.credentials_path()))
    }

    fn remote(&self) -> Result<RemoteClient> {
        RemoteClient::new(&self.config.remote, self.secrets()).with_context(|| {
            format!(
                "remote tracker is not usable; check [remote] in {}",
                self.dir.config_path().display()
            )
        })
    }

    fn driver(&self) -> Result<SyncDriver<RemoteClient>> {
        let driver = SyncDriver::new(
            self.ledger.clone(),
            self.remote()?,
            self.validator(),
            self.config.sync.clone(),
        );
        Ok(driver.with_offset(self.config.remote.offset()))
    }
}

pub async fn run(command: Command, workspace: &Workspace) -> Result<ExitCode> {
    match command {
        Command::Add {
            task,
            date,
            start,
            end,
            issue_key,
            description,
        } => {
            let draft = AddInput {
                task,
                date: date.as_deref().map(parse_date).transpose()?,
                start: parse_time(&start)?,
                end: parse_time(&end)?,
                issue_key,
                description,
            };
            let entry = add(workspace, draft).await?;
            println!("added: {}", entry.id);

            let day = workspace.ledger.list_by_date(entry.date).await?;
            let result = workspace.validator().validate(&day);
            for issue in result.for_entry(entry.id) {
                println!("  {issue}");
            }
        }
        Command::Ls(args) => {
            let entries = list(workspace, args).await?;
            if entries.is_empty() {
                println!("No entries found");
            } else {
                render::entry_table(&entries);
            }
        }
        Command::Edit {
            id,
            date,
            start,
            end,
            issue_key,
            clear_key,
            description,
        } => {
            let input = EditInput {
                date: date.as_deref().map(parse_date).transpose()?,
                start: start.as_deref().map(parse_time).transpose()?,
                end: end.as_deref().map(parse_time).transpose()?,
                issue_key: if clear_key { Some(None) } else { issue_key.map(Some) },
                description,
            };
            let entry = edit(workspace, parse_worklog_id(&id)?, input).await?;
            println!("updated: {}", render::entry_row(&entry));
        }
        Command::Rm { id, remote } => {
            let id = parse_worklog_id(&id)?;
            remove(workspace, id, remote).await?;
            println!("removed: {id}");
        }
        Command::Validate(selection) => return sync::validate(workspace, selection).await,
        Command::Sync(args) => return sync::sync(workspace, args.selection, args.yes).await,
        Command::Ping => sync::ping(workspace).await?,
        Command::Issue { key } => sync::issue(workspace, &key).await?,
        Command::Login { user, token } => sync::login(workspace, user, token).await?,
        Command::Logout => sync::logout(workspace)?,
    }

    Ok(ExitCode::SUCCESS)
}

struct AddInput {
    task: String,
    date: Option<Date>,
    start: Time,
    end: Time,
    issue_key: Option<String>,
    description: String,
}

async fn add(workspace: &Workspace, input: AddInput) -> Result<WorklogEntry> {
    if input.end <= input.start {
        bail!("end time must be after start time");
    }
    let task = resolve_task(workspace, &input.task, input.issue_key.clone()).await?;
    let date = input.date.unwrap_or_else(clock::local_today);

    let mut draft = NewWorklog::spanning(task.id, date, input.start, input.end)
        .with_task_title(task.title)
        .with_description(input.description);
    if let Some(key) = input.issue_key.or(task.issue_key) {
        draft = draft.with_issue_key(key);
    }
    Ok(workspace.ledger.append(draft).await?)
}

/// Find a task by title, creating it when no task has that title yet.
async fn resolve_task(
    workspace: &Workspace,
    title: &str,
    issue_key: Option<String>,
) -> Result<TaskRecord> {
    let title = title.trim();
    if title.is_empty() {
        bail!("task title must not be empty");
    }
    let existing = workspace
        .tasks
        .list()
        .await?
        .into_iter()
        .find(|task| task.title.eq_ignore_ascii_case(title));
    if let Some(task) = existing {
        return Ok(task);
    }
    let task = TaskRecord::new(title, issue_key, OffsetDateTime::now_utc());
    Ok(workspace.tasks.upsert(task).await?)
}

async fn list(workspace: &Workspace, args: ListArgs) -> Result<Vec<WorklogEntry>> {
    let ListArgs {
        date,
        from,
        to,
        pending,
    } = args;
    let mut entries = match (date, from, to) {
        (Some(date), _, _) => workspace.ledger.list_by_date(parse_date(&date)?).await?,
        (None, Some(from), Some(to)) => {
            let (from, to) = (parse_date(&from)?, parse_date(&to)?);
            if to < from {
                bail!("--to must not be before --from");
            }
            workspace.ledger.list_by_range(from, to).await?
        }
        _ => workspace.ledger.list().await?,
    };
    if pending {
        entries.retain(|entry| entry.sync_status == SyncStatus::Pending);
    }
    entries.sort_by_key(|entry| (entry.date, entry.start_time));
    Ok(entries)
}

struct EditInput {
    date: Option<Date>,
    start: Option<Time>,
    end: Option<Time>,
    issue_key: Option<Option<String>>,
    description: Option<String>,
}

async fn edit(workspace: &Workspace, id: WorklogId, input: EditInput) -> Result<WorklogEntry> {
    let current = workspace.ledger.get(id).await?;
    let mut patch = WorklogPatch {
        date: input.date,
        start_time: input.start,
        end_time: input.end,
        issue_key: input.issue_key,
        description: input.description,
        ..WorklogPatch::default()
    };
    if input.start.is_some() || input.end.is_some() {
        let start = input.start.unwrap_or(current.start_time);
        let end = input.end.unwrap_or(current.end_time);
        if end <= start {
            bail!("end time must be after start time");
        }
        patch.duration_minutes = Some(minutes_between(start, end));
    }
    if patch.is_empty() {
        bail!("nothing to change");
    }
    // Changed work has to be sent again; the remote id is kept so the next
    // sync updates the existing remote entry.
    if patch.touches_content() && current.sync_status != SyncStatus::Pending {
        patch.sync_status = Some(SyncStatus::Pending);
        patch.error_message = Some(None);
    }
    Ok(workspace.ledger.update(id, patch).await?)
}

async fn remove(workspace: &Workspace, id: WorklogId, remote: bool) -> Result<()> {
    let entry = workspace.ledger.get(id).await?;
    if let Some(remote_id) = &entry.remote_entry_id {
        if remote {
            let key = entry
                .issue_key
                .as_deref()
                .context("entry has a remote id but no issue key")?;
            workspace
                .remote()?
                .delete_remote_entry(key, remote_id)
                .await
                .with_context(|| format!("failed to delete remote entry {remote_id}"))?;
        } else {
            tracing::warn!(id = %id, remote_id = %remote_id, "Remote entry left in place");
        }
    }
    workspace.ledger.delete(id).await?;
    Ok(())
}

fn parse_date(raw: &str) -> Result<Date> {
    clock::parse_date(raw).with_context(|| format!("Invalid date (expected YYYY-MM-DD): {raw}"))
}

fn parse_time(raw: &str) -> Result<Time> {
    clock::parse_time(raw).with_context(|| format!("Invalid time (expected HH:MM): {raw}"))
}

fn parse_worklog_id(raw: &str) -> Result<WorklogId> {
    WorklogId::from_str(raw).with_context(|| format!("Invalid entry id: {raw}"))
}
