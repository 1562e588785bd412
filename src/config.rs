//! Daemon configuration and per-account state
//!
//! Two persisted documents plus one environment-sourced secret:
//!
//! - `config.json` at the corpus root: which accounts exist and whether
//!   drafts require review before dispatch.
//! - `accounts/<email>/account.json`: the scheduler-owned sync state,
//!   including the incremental high-water mark.
//! - App-passwords come from `MAILDECK_<SEGMENT>_PASS` environment
//!   variables (the segment is derived from the account email), held in
//!   `SecretString` so they never reach `Debug` output or logs.

use std::env;
use std::env::VarError;
use std::fs;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::fsio;
use crate::paths::Corpus;

/// Default IMAP endpoint (Gmail, implicit TLS)
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
/// Default IMAP port
pub const DEFAULT_IMAP_PORT: u16 = 993;
/// Default SMTP endpoint (Gmail, implicit TLS)
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
/// Default SMTP port
pub const DEFAULT_SMTP_PORT: u16 = 465;

/// Daemon-wide configuration, persisted as `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// When true, drafts stay in `pending_review` until promoted externally
    #[serde(default = "default_review_before_send")]
    pub review_before_send: bool,
    /// Account emails the daemon supervises
    #[serde(default)]
    pub accounts: Vec<String>,
}

fn default_review_before_send() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            review_before_send: true,
            accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Load `config.json`, defaulting when the file does not exist yet
    ///
    /// # Errors
    ///
    /// - `Parse` when the file exists but is not valid JSON
    /// - `Io` for other read failures
    pub fn load(corpus: &Corpus) -> Result<Self> {
        let path = corpus.config_file();
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `config.json` atomically, pretty-printed
    pub fn save(&self, corpus: &Corpus) -> Result<()> {
        fsio::write_json_pretty(&corpus.config_file(), self)
    }
}

/// Scheduler visibility state for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No sync in flight
    Idle,
    /// A pass is currently running
    Syncing,
    /// The last pass failed; auth errors stay here until reconfigured
    Error,
}

/// Persisted per-account sync state, `accounts/<email>/account.json`
///
/// Owned exclusively by that account's scheduler; the PID file prevents a
/// second daemon from competing for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    /// Account address
    pub email: String,
    /// Completion time of the last successful pass
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Incremental high-water mark; monotonically non-decreasing
    #[serde(default)]
    pub last_uid: Option<u64>,
    /// How far back a full sync reaches
    #[serde(default = "default_sync_depth_days")]
    pub sync_depth_days: u32,
    /// Scheduler tick interval
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Current scheduler state as shown by `status`
    #[serde(default = "default_sync_state")]
    pub sync_state: SyncState,
}

fn default_sync_depth_days() -> u32 {
    30
}

fn default_poll_interval_seconds() -> u64 {
    60
}

fn default_sync_state() -> SyncState {
    SyncState::Idle
}

impl AccountState {
    /// Fresh state for a newly configured account
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            last_sync: None,
            last_uid: None,
            sync_depth_days: default_sync_depth_days(),
            poll_interval_seconds: default_poll_interval_seconds(),
            sync_state: SyncState::Idle,
        }
    }

    /// Load `account.json`, creating default state when absent
    ///
    /// # Errors
    ///
    /// - `Parse` when the file exists but is not valid JSON
    /// - `Io` for other read failures
    pub fn load(corpus: &Corpus, email: &str) -> Result<Self> {
        let path = corpus.account_state_file(email);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(email)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `account.json` atomically, pretty-printed
    pub fn save(&self, corpus: &Corpus) -> Result<()> {
        fsio::write_json_pretty(&corpus.account_state_file(&self.email), self)
    }

    /// Record a successful pass: advance the high-water mark and stamp
    /// `last_sync`
    ///
    /// The mark never regresses, so a pass that observed no new mail (or a
    /// smaller maximum UID after a server-side anomaly) leaves it alone.
    pub fn record_success(&mut self, observed_last_uid: u64, now: DateTime<Utc>) {
        if observed_last_uid > self.last_uid.unwrap_or(0) {
            self.last_uid = Some(observed_last_uid);
        }
        self.last_sync = Some(now);
        self.sync_state = SyncState::Idle;
    }
}

/// Network credentials for one account
///
/// Password is environment-sourced and wrapped in `SecretString`.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Login user (the account email)
    pub user: String,
    /// App password, never logged
    pub pass: SecretString,
    /// IMAP host
    pub imap_host: String,
    /// IMAP port
    pub imap_port: u16,
    /// SMTP host
    pub smtp_host: String,
    /// SMTP port
    pub smtp_port: u16,
}

impl Credentials {
    /// Load credentials for an account from the environment
    ///
    /// Reads `MAILDECK_<SEGMENT>_PASS` (required) plus optional
    /// `_IMAP_HOST`, `_IMAP_PORT`, `_SMTP_HOST`, `_SMTP_PORT` overrides,
    /// where `<SEGMENT>` is the email uppercased with every
    /// non-alphanumeric character replaced by `_`
    /// (`me@gmail.com` → `ME_GMAIL_COM`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the password variable is missing or a
    /// port override fails to parse.
    pub fn load_from_env(email: &str) -> Result<Self> {
        let prefix = format!("MAILDECK_{}_", env_segment(email));
        let pass = required_env(&format!("{prefix}PASS"))?;

        Ok(Self {
            user: email.to_owned(),
            pass: SecretString::new(pass.into()),
            imap_host: optional_env(&format!("{prefix}IMAP_HOST"))
                .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_owned()),
            imap_port: parse_u16_env(&format!("{prefix}IMAP_PORT"), DEFAULT_IMAP_PORT)?,
            smtp_host: optional_env(&format!("{prefix}SMTP_HOST"))
                .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_owned()),
            smtp_port: parse_u16_env(&format!("{prefix}SMTP_PORT"), DEFAULT_SMTP_PORT)?,
        })
    }
}

/// Derive the environment-variable segment from an account email
///
/// Uppercases and replaces every non-alphanumeric character with `_`,
/// trimming leading/trailing underscores.
fn env_segment(email: &str) -> String {
    let mut out = String::with_capacity(email.len());
    for ch in email.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable, treating empty as unset
fn optional_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> Result<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            Error::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(Error::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
