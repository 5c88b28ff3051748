//! CLI entry point for worklog.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;
mod render;

/// Local worklog ledger that reconciles with an issue tracker.
#[derive(Parser, Debug)]
#[command(
    name = "worklog",
    version,
    about = "worklog: record work sessions locally and push them to the issue tracker"
)]
struct Cli {
    /// Data directory (defaults to $WORKLOG_HOME or the platform data dir).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a work session.
    Add {
        /// Task title; created on first use.
        #[arg(long)]
        task: String,
        /// Work date (YYYY-MM-DD), defaults to today.
        #[arg(long)]
        date: Option<String>,
        /// Start time (HH:MM).
        #[arg(long)]
        start: String,
        /// End time (HH:MM).
        #[arg(long)]
        end: String,
        /// Issue key; falls back to the task's key.
        #[arg(short = 'k', long = "key")]
        issue_key: Option<String>,
        /// Description sent as the remote comment.
        #[arg(short = 'm', long = "message", default_value = "")]
        description: String,
    },

    /// List entries.
    Ls(ListArgs),

    /// Change fields of an entry. Content changes make it pending again.
    Edit {
        /// Entry id.
        id: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(short = 'k', long = "key", conflicts_with = "clear_key")]
        issue_key: Option<String>,
        /// Remove the issue key.
        #[arg(long)]
        clear_key: bool,
        #[arg(short = 'm', long = "message")]
        description: Option<String>,
    },

    /// Delete an entry from the ledger.
    Rm {
        /// Entry id.
        id: String,
        /// Also delete the entry from the remote tracker.
        #[arg(long)]
        remote: bool,
    },

    /// Run pre-sync validation without sending anything.
    Validate(Selection),

    /// Validate and push entries to the remote tracker.
    Sync(SyncArgs),

    /// Check the connection and credentials.
    Ping,

    /// Show an issue from the remote tracker.
    Issue {
        /// Issue key, e.g. PROJ-123.
        key: String,
    },

    /// Store remote credentials in the data directory.
    Login {
        #[arg(long)]
        user: String,
        /// Password or API token.
        #[arg(long, env = "WORKLOG_REMOTE_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Forget the stored remote credentials.
    Logout,
}

/// Filters for `ls`.
#[derive(Args, Debug, Default)]
struct ListArgs {
    /// Only entries on this date.
    #[arg(long, conflicts_with_all = ["from", "to"])]
    date: Option<String>,
    /// Range start (inclusive).
    #[arg(long, requires = "to")]
    from: Option<String>,
    /// Range end (inclusive).
    #[arg(long, requires = "from")]
    to: Option<String>,
    /// Only entries not yet synced.
    #[arg(long)]
    pending: bool,
}

/// Entries a validate/sync run works on: pending ones unless ids are given.
#[derive(Args, Debug, Default)]
struct Selection {
    /// Entry ids to include instead of every pending entry.
    #[arg(long = "id")]
    ids: Vec<String>,
    /// Also include entries whose last sync failed.
    #[arg(long, conflicts_with = "ids")]
    failed: bool,
}

/// Arguments for `sync`.
#[derive(Args, Debug, Default)]
struct SyncArgs {
    #[command(flatten)]
    selection: Selection,
    /// Send without asking when validation reports warnings.
    #[arg(short = 'y', long)]
    yes: bool,
}

fn main() -> ExitCode {
    let Cli { home, cmd } = Cli::parse();
    install_tracing();

    match execute_command(home, cmd) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute_command(home: Option<PathBuf>, command: Command) -> Result<ExitCode> {
    let workspace = commands::Workspace::open(home)?;
    tokio::runtime::Runtime::new()?.block_on(commands::run(command, &workspace))
}

fn install_tracing() {
    // RUST_LOG overrides; INFO otherwise.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
