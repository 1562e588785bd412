//! Daemon supervisor
//!
//! Owns the process lifecycle: loads configuration, claims the PID file,
//! starts one scheduler and one outbox watcher per account, and tears
//! everything down on SIGINT/SIGTERM. Exactly one daemon runs per corpus
//! — a second `start` against the same base refuses while the recorded
//! PID is alive.

use std::fs;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, Credentials};
use crate::errors::{Error, Result};
use crate::paths::Corpus;
use crate::scheduler::Scheduler;
use crate::smtp::SmtpSender;
use crate::storage::StorageWriter;
use crate::watcher::OutboxWatcher;

/// Read the PID recorded in the corpus, if any
///
/// A present but unparseable PID file is treated as absent (stale junk
/// from a crashed run).
pub fn read_pid(corpus: &Corpus) -> Option<i32> {
    let text = fs::read_to_string(corpus.pid_file()).ok()?;
    text.trim().parse::<i32>().ok()
}

/// Whether a process with this PID is currently alive
#[cfg(unix)]
pub fn pid_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes existence without delivering anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Whether a process with this PID is currently alive
#[cfg(not(unix))]
pub fn pid_is_alive(_pid: i32) -> bool {
    false
}

/// Send SIGTERM to a running daemon
///
/// # Errors
///
/// `NotFound` when no live daemon holds the PID file; `Internal` when
/// the signal cannot be delivered.
#[cfg(unix)]
pub fn signal_stop(corpus: &Corpus) -> Result<i32> {
    let pid = read_pid(corpus)
        .filter(|pid| pid_is_alive(*pid))
        .ok_or_else(|| Error::NotFound("daemon is not running".to_owned()))?;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(Error::Internal(format!("failed to signal pid {pid}")));
    }
    Ok(pid)
}

/// Send a stop request to a running daemon
#[cfg(not(unix))]
pub fn signal_stop(_corpus: &Corpus) -> Result<i32> {
    Err(Error::Internal(
        "stop is only supported on unix platforms".to_owned(),
    ))
}

/// Claim the PID file for this process
///
/// Refuses when another live process already holds it; silently replaces
/// a stale file left by a crash.
fn claim_pid_file(corpus: &Corpus) -> Result<()> {
    if let Some(existing) = read_pid(corpus)
        && pid_is_alive(existing)
    {
        return Err(Error::invalid(format!(
            "daemon already running with pid {existing}"
        )));
    }
    crate::fsio::atomic_write_file(
        &corpus.pid_file(),
        format!("{}\n", std::process::id()).as_bytes(),
    )
}

/// Remove the PID file, tolerating its absence
fn release_pid_file(corpus: &Corpus) {
    if let Err(e) = fs::remove_file(corpus.pid_file())
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(error = %e, "could not remove pid file");
    }
}

/// Run the daemon until a termination signal arrives
///
/// Per configured account (optionally narrowed to one): loads
/// credentials from the environment, starts a scheduler and an outbox
/// watcher. Accounts whose credentials are missing are skipped with an
/// error log; the daemon refuses to start only when no account at all
/// could be brought up.
///
/// # Errors
///
/// - `InvalidInput` when the PID file is held or no account starts
/// - `Io` / `Parse` from configuration loading
pub async fn run_daemon(corpus: &Corpus, account_filter: Option<&str>) -> Result<()> {
    let config = Config::load(corpus)?;
    let accounts: Vec<String> = config
        .accounts
        .iter()
        .filter(|email| account_filter.is_none_or(|wanted| wanted == email.as_str()))
        .cloned()
        .collect();
    if accounts.is_empty() {
        return Err(Error::invalid(match account_filter {
            Some(wanted) => format!("account '{wanted}' is not configured"),
            None => "no accounts configured; run setup first".to_owned(),
        }));
    }

    claim_pid_file(corpus)?;
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut started = 0usize;

    for email in &accounts {
        let creds = match Credentials::load_from_env(email) {
            Ok(creds) => creds,
            Err(e) => {
                error!(account = %email, error = %e, "skipping account without credentials");
                continue;
            }
        };

        let storage = StorageWriter::new(corpus.clone(), email.clone());
        storage.ensure_account_tree()?;

        let on_error = Arc::new(|account: &str, err: &Error| {
            error!(account = %account, error = %err, "sync error surfaced to supervisor");
        });
        let scheduler = Scheduler::new(storage, creds.clone(), cancel.child_token(), on_error);
        tasks.spawn(async move {
            if let Err(e) = scheduler.run().await {
                error!(error = %e, "scheduler terminated with error");
            }
        });

        let watcher = OutboxWatcher::new(
            corpus.clone(),
            email.clone(),
            config.review_before_send,
            Arc::new(SmtpSender::new(creds)),
            cancel.child_token(),
        );
        tasks.spawn(async move {
            if let Err(e) = watcher.run().await {
                error!(error = %e, "outbox watcher terminated with error");
            }
        });
        started += 1;
        info!(account = %email, "account supervised");
    }

    if started == 0 {
        release_pid_file(corpus);
        return Err(Error::invalid(
            "no account could be started; check credentials".to_owned(),
        ));
    }

    info!(accounts = started, pid = std::process::id(), "daemon running");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    release_pid_file(corpus);
    info!("daemon stopped");
    Ok(())
}

/// Block until SIGINT or SIGTERM
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

/// Block until the platform shutdown event
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
