//! Per-account sync scheduler
//!
//! One polling loop per account, owning that account's persisted state.
//! The first pass runs immediately (incremental when a high-water mark
//! exists, full otherwise); afterwards a timer ticks at the account's
//! poll interval. Single-flight: a tick that finds a sync still running
//! skips without queueing.
//!
//! Error disposition follows the taxonomy: transient errors log and wait
//! for the next tick, auth failures park the account in `error` state and
//! end the loop until reconfiguration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AccountState, Credentials, SyncState};
use crate::errors::{Error, Result};
use crate::imap::ImapClient;
use crate::storage::StorageWriter;
use crate::sync::{SyncPass, run_sync};

/// Callback surfacing sync errors to the supervisor
pub type ErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Scheduler for one account
pub struct Scheduler {
    storage: StorageWriter,
    creds: Credentials,
    cancel: CancellationToken,
    syncing: Arc<AtomicBool>,
    on_error: ErrorCallback,
}

/// Pick the pass for a scheduled tick
///
/// Incremental once a high-water mark exists, full otherwise.
pub fn choose_pass(state: &AccountState) -> SyncPass {
    match state.last_uid {
        Some(last_uid) if last_uid > 0 => SyncPass::Incremental { last_uid },
        _ => SyncPass::Full {
            days: state.sync_depth_days,
            max: None,
        },
    }
}

impl Scheduler {
    /// Create a scheduler; does not start the loop
    pub fn new(
        storage: StorageWriter,
        creds: Credentials,
        cancel: CancellationToken,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            storage,
            creds,
            cancel,
            syncing: Arc::new(AtomicBool::new(false)),
            on_error,
        }
    }

    /// Run the polling loop until cancelled
    ///
    /// Loads state, syncs once immediately, then ticks at
    /// `poll_interval_seconds`. Cancellation lets an in-flight pass
    /// finish; the pass itself checks the token at its own boundaries.
    pub async fn run(self) -> Result<()> {
        let account = self.storage.account().to_owned();
        let mut state = AccountState::load(self.storage.corpus(), &account)?;
        info!(
            account = %account,
            last_uid = state.last_uid.unwrap_or(0),
            interval = state.poll_interval_seconds,
            "scheduler starting"
        );

        if !self.tick(&mut state).await {
            return Ok(());
        }

        let mut timer =
            tokio::time::interval(Duration::from_secs(state.poll_interval_seconds.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = timer.tick() => {
                    if !self.tick(&mut state).await {
                        break;
                    }
                }
            }
        }
        info!(account = %account, "scheduler stopped");
        Ok(())
    }

    /// Run one pass; returns whether the loop should continue
    async fn tick(&self, state: &mut AccountState) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!(account = %state.email, "sync already in flight, skipping tick");
            return true;
        }

        state.sync_state = SyncState::Syncing;
        if let Err(e) = state.save(self.storage.corpus()) {
            warn!(account = %state.email, error = %e, "could not persist syncing state");
        }

        let pass = choose_pass(state);
        let mut client = ImapClient::new(self.creds.clone());
        let result = run_sync(&mut client, &self.storage, pass, &self.cancel).await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                state.record_success(report.last_uid, Utc::now());
                if let Err(e) = state.save(self.storage.corpus()) {
                    warn!(account = %state.email, error = %e, "could not persist account state");
                }
                info!(
                    account = %state.email,
                    threads = report.threads_touched,
                    messages = report.messages_written,
                    last_uid = state.last_uid.unwrap_or(0),
                    "sync pass complete"
                );
                true
            }
            Err(e) => {
                state.sync_state = SyncState::Error;
                if let Err(save_err) = state.save(self.storage.corpus()) {
                    warn!(account = %state.email, error = %save_err, "could not persist error state");
                }
                (self.on_error)(&state.email, &e);

                if matches!(e, Error::AuthFailed(_)) {
                    error!(
                        account = %state.email,
                        error = %e,
                        "authentication failed, scheduler parked until reconfigured"
                    );
                    false
                } else {
                    warn!(account = %state.email, error = %e, "sync pass failed, retrying next tick");
                    true
                }
            }
        }
    }
}
