//! Outbox draft state machine
//!
//! Drafts advance through a fixed lifecycle:
//!
//! ```text
//! pending_review ─► ready_to_send ─► sending ─► sent     (terminal)
//!                                            └► failed   (terminal)
//! ```
//!
//! Any other `(current, new)` pair is rejected and the on-disk file stays
//! untouched. Terminal transitions move the draft out of `outbox/` into
//! `sent/` or `failed/`, writing the destination before deleting the
//! source so the draft exists in exactly one directory at every observable
//! instant.

use std::fs;

use chrono::Utc;
use tracing::info;

use crate::errors::{Error, Result};
use crate::fsio;
use crate::models::{Draft, DraftStatus, format_utc};
use crate::paths::Corpus;

/// Allowed `(current, new)` status pairs
const ALLOWED_TRANSITIONS: [(DraftStatus, DraftStatus); 4] = [
    (DraftStatus::PendingReview, DraftStatus::ReadyToSend),
    (DraftStatus::ReadyToSend, DraftStatus::Sending),
    (DraftStatus::Sending, DraftStatus::Sent),
    (DraftStatus::Sending, DraftStatus::Failed),
];

/// Metadata attached on a transition
#[derive(Debug, Clone, Default)]
pub struct TransitionExtra {
    /// Provider message id, set on `sent`
    pub provider_message_id: Option<String>,
    /// Failure description, set on `failed`
    pub error: Option<String>,
}

/// Whether a status pair is a legal transition
pub fn is_allowed(current: DraftStatus, new: DraftStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(current, new))
}

/// Parse and validate a draft from its JSON value
///
/// Shape problems (unknown status, reply without `thread_id`) fail at the
/// typed parse; the semantic checks cover what the type system cannot:
/// at least one recipient, every recipient containing `@`, and non-empty
/// subject and body.
///
/// # Errors
///
/// `Parse` for shape errors, `InvalidInput` for semantic ones.
pub fn validate_draft(value: serde_json::Value) -> Result<Draft> {
    let draft: Draft = serde_json::from_value(value)
        .map_err(|e| Error::Parse(format!("draft does not match expected shape: {e}")))?;

    if draft.to.is_empty() {
        return Err(Error::invalid("draft has no recipients"));
    }
    for to in draft.to.iter().chain(draft.cc.iter()) {
        if !to.contains('@') {
            return Err(Error::invalid(format!("recipient '{to}' is not an address")));
        }
    }
    if draft.subject.trim().is_empty() {
        return Err(Error::invalid("draft subject is empty"));
    }
    if draft.body.trim().is_empty() {
        return Err(Error::invalid("draft body is empty"));
    }
    Ok(draft)
}

/// Read a draft from the outbox by filename
///
/// # Errors
///
/// - `NotFound` when the file is gone (already transitioned)
/// - `Parse` when the contents are not a valid draft
pub fn read_draft(corpus: &Corpus, account: &str, filename: &str) -> Result<Draft> {
    let path = corpus.outbox_file(account, filename);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("draft '{filename}' is not in the outbox")));
        }
        Err(e) => return Err(e.into()),
    };
    validate_draft(serde_json::from_str(&text)?)
}

/// Advance a draft to a new status
///
/// Verifies the transition against the allowed set, merges `extra`, and
/// persists: terminal states move the file to `sent/` or `failed/` with
/// their timestamp fields, everything else rewrites in place. Returns the
/// updated draft.
///
/// # Errors
///
/// - `InvalidTransition` for a disallowed pair; the file is unchanged
/// - `NotFound` / `Parse` from reading the current draft
/// - I/O errors from the atomic writer
pub fn transition(
    corpus: &Corpus,
    account: &str,
    filename: &str,
    new_status: DraftStatus,
    extra: TransitionExtra,
) -> Result<Draft> {
    let mut draft = read_draft(corpus, account, filename)?;
    if !is_allowed(draft.status, new_status) {
        return Err(Error::InvalidTransition(format!(
            "draft '{filename}': {:?} -> {:?} is not allowed",
            draft.status, new_status
        )));
    }

    draft.status = new_status;
    if let Some(id) = extra.provider_message_id {
        draft.provider_message_id = Some(id);
    }
    if let Some(error) = extra.error {
        draft.error = Some(error);
    }

    let now = format_utc(Utc::now());
    let source = corpus.outbox_file(account, filename);
    match new_status {
        DraftStatus::Sent => {
            draft.sent_at = Some(now);
            fsio::write_json_pretty(&corpus.sent_file(account, filename), &draft)?;
            fs::remove_file(&source)?;
            info!(account, draft = filename, "draft sent");
        }
        DraftStatus::Failed => {
            draft.failed_at = Some(now);
            fsio::write_json_pretty(&corpus.failed_file(account, filename), &draft)?;
            fs::remove_file(&source)?;
            info!(account, draft = filename, error = ?draft.error, "draft failed");
        }
        _ => {
            fsio::write_json_pretty(&source, &draft)?;
        }
    }
    Ok(draft)
}
