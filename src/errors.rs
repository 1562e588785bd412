//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Variants follow the
//! operational taxonomy of the daemon: transient network trouble retries on
//! the next scheduler tick, auth failures park the account, per-item parse
//! failures skip the item, and I/O failures end the current pass.

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the sync daemon may encounter. The variant chosen
/// decides disposition: `Network`/`Timeout` are retried on the next tick,
/// `Auth` stops retries for the account, `Parse` skips the offending item,
/// and `Io` aborts the running pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user input (validation failed, malformed draft or argument)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (account, mailbox, thread, draft)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, revoked app password)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Transient network failure (connect refused, reset, 5xx-class)
    #[error("network error: {0}")]
    Network(String),
    /// Protocol-level failure (malformed IMAP response, missing mailbox state)
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Per-item parse failure (unreadable MIME, unreadable draft JSON)
    #[error("parse error: {0}")]
    Parse(String),
    /// Outbox lifecycle violation (disallowed status transition)
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// SMTP submission failure (auth, transport, permanent reject)
    #[error("smtp error: {0}")]
    Smtp(String),
    /// Filesystem failure out of the atomic writer or corpus reads
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the error is worth retrying on the next scheduler tick
    ///
    /// Auth failures are permanent until the account is reconfigured;
    /// everything network-shaped is transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(format!("json: {e}"))
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;
