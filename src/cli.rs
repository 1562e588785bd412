//! Daemon command-line interface
//!
//! Four subcommands drive the core: `start` (foreground daemon), `stop`
//! (signal a running daemon), `status` (daemon + per-account state), and
//! `sync` (one-shot pass). Every invocation writes exactly one JSON line
//! to stdout and exits 0 iff that line says `ok: true`; logs go to the
//! corpus log file, never stdout.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{AccountState, Config, Credentials};
use crate::daemon;
use crate::errors::{Error, Result};
use crate::imap::ImapClient;
use crate::logging;
use crate::paths::Corpus;
use crate::scheduler;
use crate::storage::StorageWriter;
use crate::sync::{SyncPass, process_batch, run_sync};

/// Local agent-native mail mirror
#[derive(Debug, Parser)]
#[command(name = "maildeck", version, about)]
pub struct Cli {
    /// Corpus base directory (defaults to ~/.maildeck)
    #[arg(long, global = true)]
    pub base: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

/// Daemon commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sync daemon in the foreground
    Start {
        /// Supervise only this account
        #[arg(long)]
        account: Option<String>,
    },
    /// Signal a running daemon to shut down
    Stop,
    /// Report daemon liveness and per-account sync state
    Status,
    /// Run one sync pass and exit
    Sync {
        /// Sync only this account
        #[arg(long)]
        account: Option<String>,
        /// Days of history for a full pass
        #[arg(long)]
        days: Option<u32>,
        /// Cap on fetched messages, newest win
        #[arg(long)]
        max: Option<usize>,
        /// Force a full pass even when a high-water mark exists
        #[arg(long)]
        full: bool,
        /// Fetch unseen inbox messages only; the high-water mark is untouched
        #[arg(long)]
        unread: bool,
        /// With --unread, mark the fetched messages seen afterwards
        #[arg(long)]
        mark_seen: bool,
    },
}

/// Execute a parsed invocation
///
/// Prints the single JSON result line and returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let corpus = cli
        .base
        .map(Corpus::new)
        .unwrap_or_else(Corpus::default_base);

    let outcome = match cli.command {
        Command::Start { account } => start(&corpus, account.as_deref()).await,
        Command::Stop => stop(&corpus),
        Command::Status => status(&corpus),
        Command::Sync {
            account,
            days,
            max,
            full,
            unread,
            mark_seen,
        } => sync(&corpus, account.as_deref(), days, max, full, unread, mark_seen).await,
    };

    match outcome {
        Ok(mut value) => {
            value["ok"] = json!(true);
            println!("{value}");
            0
        }
        Err(e) => {
            println!("{}", json!({ "ok": false, "error": e.to_string() }));
            1
        }
    }
}

/// `start`: run the daemon until a termination signal
async fn start(corpus: &Corpus, account: Option<&str>) -> Result<serde_json::Value> {
    logging::init(&corpus.log_file())?;
    daemon::run_daemon(corpus, account).await?;
    Ok(json!({ "daemon": "stopped" }))
}

/// `stop`: SIGTERM the daemon recorded in the PID file
fn stop(corpus: &Corpus) -> Result<serde_json::Value> {
    let pid = daemon::signal_stop(corpus)?;
    Ok(json!({ "stopped_pid": pid }))
}

/// `status`: daemon liveness plus per-account state and outbox counts
fn status(corpus: &Corpus) -> Result<serde_json::Value> {
    let config = Config::load(corpus)?;
    let pid = daemon::read_pid(corpus);
    let running = pid.is_some_and(daemon::pid_is_alive);

    let mut accounts = Vec::with_capacity(config.accounts.len());
    for email in &config.accounts {
        let state = AccountState::load(corpus, email)?;
        accounts.push(json!({
            "email": email,
            "sync_state": state.sync_state,
            "last_sync": state.last_sync,
            "last_uid": state.last_uid.unwrap_or(0),
            "outbox": count_json_files(corpus.outbox_dir(email)),
            "sent": count_json_files(corpus.sent_dir(email)),
            "failed": count_json_files(corpus.failed_dir(email)),
        }));
    }

    Ok(json!({
        "running": running,
        "pid": pid,
        "accounts": accounts,
    }))
}

/// `sync`: one-shot pass over one or all accounts
async fn sync(
    corpus: &Corpus,
    account: Option<&str>,
    days: Option<u32>,
    max: Option<usize>,
    full: bool,
    unread: bool,
    mark_seen: bool,
) -> Result<serde_json::Value> {
    logging::init(&corpus.log_file()).ok();
    let config = Config::load(corpus)?;
    let targets: Vec<String> = config
        .accounts
        .iter()
        .filter(|email| account.is_none_or(|wanted| wanted == email.as_str()))
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(Error::invalid(match account {
            Some(wanted) => format!("account '{wanted}' is not configured"),
            None => "no accounts configured; run setup first".to_owned(),
        }));
    }

    let cancel = CancellationToken::new();
    let mut results = Vec::with_capacity(targets.len());
    for email in &targets {
        let creds = Credentials::load_from_env(email)?;
        let storage = StorageWriter::new(corpus.clone(), email.clone());
        let mut state = AccountState::load(corpus, email)?;
        let mut client = ImapClient::new(creds);

        let report = if unread {
            storage.ensure_account_tree()?;
            client.connect().await?;
            let batch = client.fetch_unread().await?;
            let uids: Vec<u32> = batch.iter().map(|m| m.uid).collect();
            let report = process_batch(&storage, batch, &cancel)?;
            if mark_seen {
                client.mark_seen(&uids).await?;
            }
            client.disconnect().await;
            report
        } else {
            let pass = if full || days.is_some() || max.is_some() {
                SyncPass::Full {
                    days: days.unwrap_or(state.sync_depth_days),
                    max,
                }
            } else {
                scheduler::choose_pass(&state)
            };
            let report = run_sync(&mut client, &storage, pass, &cancel).await?;
            state.record_success(report.last_uid, Utc::now());
            state.save(corpus)?;
            report
        };

        results.push(json!({
            "email": email,
            "threads_touched": report.threads_touched,
            "messages_written": report.messages_written,
            "last_uid": state.last_uid.unwrap_or(0),
        }));
    }

    Ok(json!({ "synced": results }))
}

/// Count `.json` files in a directory, absent directories counting zero
fn count_json_files(dir: PathBuf) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some("json")
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, count_json_files, status};
    use crate::config::Config;
    use crate::paths::Corpus;

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::parse_from([
            "maildeck", "sync", "--account", "me@gmail.com", "--days", "7", "--max", "100",
            "--full",
        ]);
        match cli.command {
            Command::Sync {
                account,
                days,
                max,
                full,
                unread,
                mark_seen,
            } => {
                assert_eq!(account.as_deref(), Some("me@gmail.com"));
                assert_eq!(days, Some(7));
                assert_eq!(max, Some(100));
                assert!(full);
                assert!(!unread);
                assert!(!mark_seen);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_base_override() {
        let cli = Cli::parse_from(["maildeck", "--base", "/tmp/elsewhere", "status"]);
        assert_eq!(cli.base.as_deref(), Some(std::path::Path::new("/tmp/elsewhere")));
    }

    #[test]
    fn status_reports_configured_accounts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        Config {
            review_before_send: true,
            accounts: vec!["me@gmail.com".to_owned()],
        }
        .save(&corpus)
        .expect("save config");

        let value = status(&corpus).expect("status");
        assert_eq!(value["running"], false);
        assert_eq!(value["accounts"][0]["email"], "me@gmail.com");
        assert_eq!(value["accounts"][0]["sync_state"], "idle");
        assert_eq!(value["accounts"][0]["outbox"], 0);
    }

    #[test]
    fn missing_directories_count_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(count_json_files(dir.path().join("nope")), 0);
    }
}
