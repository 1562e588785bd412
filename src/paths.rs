//! Corpus path resolution
//!
//! Every on-disk location the daemon touches is derived here; no other
//! module concatenates corpus paths. The resolver is a pure mapping from
//! `(base, account, thread, message)` to paths, so the layout documented in
//! the README is enforced in exactly one place.
//!
//! Filenames passing through [`sanitize_filename`] can never escape the
//! account subtree: path separators, drive/stream separators, wildcard and
//! redirection characters, leading `-`, and embedded `..` are all replaced
//! with `_`.

use std::path::{Path, PathBuf};

/// Directory name of the corpus under the user's home
pub const DEFAULT_BASE_DIR: &str = ".maildeck";

/// Resolver for all corpus paths
///
/// Cheap to clone; holds only the base directory. Constructed once from
/// config (or a temp dir in tests) and passed by reference everywhere.
#[derive(Debug, Clone)]
pub struct Corpus {
    base: PathBuf,
}

impl Corpus {
    /// Create a resolver rooted at an explicit base directory
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Create a resolver rooted at `$HOME/.maildeck`
    ///
    /// Falls back to the current directory when no home directory can be
    /// determined (containers, stripped-down service users).
    pub fn default_base() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            base: home.join(DEFAULT_BASE_DIR),
        }
    }

    /// Corpus root directory
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Global daemon config: `BASE/config.json`
    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Daemon PID file: `BASE/daemon.pid`
    pub fn pid_file(&self) -> PathBuf {
        self.base.join("daemon.pid")
    }

    /// Log directory: `BASE/logs`
    pub fn log_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Sync log: `BASE/logs/sync.log`
    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("sync.log")
    }

    /// Account subtree: `BASE/accounts/<email>`
    pub fn account_dir(&self, email: &str) -> PathBuf {
        self.base.join("accounts").join(sanitize_filename(email))
    }

    /// Persisted account state: `.../account.json`
    pub fn account_state_file(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("account.json")
    }

    /// Optional trailing signature: `.../signature.txt`
    pub fn signature_file(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("signature.txt")
    }

    /// Index directory: `.../index`
    pub fn index_dir(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("index")
    }

    /// Thread index: `.../index/threads.jsonl`
    pub fn threads_index(&self, email: &str) -> PathBuf {
        self.index_dir(email).join("threads.jsonl")
    }

    /// Contact index: `.../index/contacts.jsonl`
    pub fn contacts_index(&self, email: &str) -> PathBuf {
        self.index_dir(email).join("contacts.jsonl")
    }

    /// Threads root: `.../threads`
    pub fn threads_dir(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("threads")
    }

    /// One thread: `.../threads/<tid>`
    pub fn thread_dir(&self, email: &str, thread_id: &str) -> PathBuf {
        self.threads_dir(email).join(sanitize_filename(thread_id))
    }

    /// Thread metadata: `.../threads/<tid>/thread.json`
    pub fn thread_meta_file(&self, email: &str, thread_id: &str) -> PathBuf {
        self.thread_dir(email, thread_id).join("thread.json")
    }

    /// Message directory: `.../threads/<tid>/messages`
    pub fn messages_dir(&self, email: &str, thread_id: &str) -> PathBuf {
        self.thread_dir(email, thread_id).join("messages")
    }

    /// One message file by its generated filename
    pub fn message_file(&self, email: &str, thread_id: &str, filename: &str) -> PathBuf {
        self.messages_dir(email, thread_id)
            .join(sanitize_filename(filename))
    }

    /// Attachment directory: `.../threads/<tid>/attachments`
    pub fn attachments_dir(&self, email: &str, thread_id: &str) -> PathBuf {
        self.thread_dir(email, thread_id).join("attachments")
    }

    /// One attachment by sanitized filename
    pub fn attachment_file(&self, email: &str, thread_id: &str, filename: &str) -> PathBuf {
        self.attachments_dir(email, thread_id)
            .join(sanitize_filename(filename))
    }

    /// Outbox directory: `.../outbox`
    pub fn outbox_dir(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("outbox")
    }

    /// Sent (terminal success) directory: `.../sent`
    pub fn sent_dir(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("sent")
    }

    /// Failed (terminal quarantine) directory: `.../failed`
    pub fn failed_dir(&self, email: &str) -> PathBuf {
        self.account_dir(email).join("failed")
    }

    /// A draft inside the outbox
    pub fn outbox_file(&self, email: &str, name: &str) -> PathBuf {
        self.outbox_dir(email).join(sanitize_filename(name))
    }

    /// A draft inside sent/
    pub fn sent_file(&self, email: &str, name: &str) -> PathBuf {
        self.sent_dir(email).join(sanitize_filename(name))
    }

    /// A draft inside failed/
    pub fn failed_file(&self, email: &str, name: &str) -> PathBuf {
        self.failed_dir(email).join(sanitize_filename(name))
    }
}

/// Sanitize a name for use as a single path component
///
/// Replaces `/ \ : * ? " < > |`, a leading `-`, and every `..` sequence
/// with `_`. An empty (or all-whitespace) input becomes `attachment` so
/// nameless MIME parts still land somewhere deterministic.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "attachment".to_owned();
    }

    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => out.push(ch),
        }
    }
    while out.contains("..") {
        out = out.replace("..", "_");
    }
    if out.starts_with('-') {
        out.replace_range(0..1, "_");
    }
    if out.is_empty() {
        return "attachment".to_owned();
    }
    out
}
