//! Corpus and outbox data model
//!
//! Defines every structure that is serialized into the on-disk corpus:
//! thread metadata, index entries, contacts, message frontmatter, and the
//! sum-typed outbox draft. The serde renames here are the wire format —
//! downstream programs grep these files, so field names are part of the
//! public contract.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Attachment size ceiling; larger files are recorded but not stored
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// A mail participant as recorded in thread metadata
///
/// `role` is `self` iff the address equals the owning account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Address, lowercased
    pub email: String,
    /// Display name as it appeared in the header, may be empty
    pub name: String,
    /// Whether this is the account owner or an external party
    pub role: ParticipantRole,
}

/// Participant classification relative to the owning account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// The owning account itself
    #[serde(rename = "self")]
    Owner,
    /// Anyone else
    External,
}

/// Attachment record inside `thread.json`
///
/// Files exceeding [`MAX_ATTACHMENT_BYTES`] are recorded with
/// `skipped: true` and no bytes on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Sanitized filename as stored under `attachments/`
    pub filename: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Decoded size in bytes
    pub size_bytes: usize,
    /// True when the payload was withheld for exceeding the size bound
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Per-thread metadata persisted as `threads/<id>/thread.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMeta {
    /// Opaque thread identifier (provider id or subject hash)
    pub id: String,
    /// Thread subject (first message of the batch wins)
    pub subject: String,
    /// Label set accumulated from message flags
    pub labels: Vec<String>,
    /// True when any message is unseen
    pub unread: bool,
    /// True when any message is flagged
    pub starred: bool,
    /// All participants seen across the thread's messages
    pub participants: Vec<Participant>,
    /// Date of the oldest message, RFC 3339 UTC
    pub first_date: String,
    /// Date of the newest message, RFC 3339 UTC
    pub last_date: String,
    /// Number of messages written for this thread
    pub message_count: usize,
    /// True when any attachment record exists
    pub has_attachments: bool,
    /// Attachment records across the thread
    pub attachments: Vec<AttachmentMeta>,
}

/// Denormalized thread projection, one JSONL line in `index/threads.jsonl`
///
/// Optimized for grep: everything an agent needs to decide whether to open
/// the thread directory is on one line. The file is kept sorted by
/// `last_date` descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadIndexEntry {
    /// Thread identifier, unique within the index
    pub id: String,
    /// Thread subject
    pub subject: String,
    /// Sender address of the newest message
    pub from: String,
    /// Display name matching `from`
    pub from_name: String,
    /// Participant addresses
    pub participants: Vec<String>,
    /// Label set
    pub labels: Vec<String>,
    /// True when any message is unseen
    pub unread: bool,
    /// True when any message is flagged
    pub starred: bool,
    /// Message count
    pub msg_count: usize,
    /// Newest message date, RFC 3339 UTC (index sort key)
    pub last_date: String,
    /// Oldest message date, RFC 3339 UTC
    pub first_date: String,
    /// Cleaned-body preview of the newest message
    pub snippet: String,
    /// True when the thread carries attachments
    pub has_attachments: bool,
    /// Total bytes of message bodies written for the thread
    pub size_bytes: usize,
}

/// Contact record, one JSONL line in `index/contacts.jsonl`
///
/// One record per unique external sender, keyed by `email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntry {
    /// Address, lowercased (upsert key)
    pub email: String,
    /// Most recently seen display name
    pub name: String,
    /// First time this sender was seen, RFC 3339 UTC
    pub first_seen: String,
    /// Most recent time this sender was seen, RFC 3339 UTC
    pub last_seen: String,
    /// Messages received from this sender
    pub msg_count: usize,
    /// Labels commonly present on this sender's threads
    pub common_labels: Vec<String>,
    /// True once `msg_count` reaches the frequency threshold
    pub is_frequent: bool,
}

impl ContactEntry {
    /// Messages from a sender before they count as frequent
    pub const FREQUENT_THRESHOLD: usize = 5;
}

/// An address with optional display name, as written into frontmatter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Bare address
    pub email: String,
    /// Display name, empty when the header carried none
    #[serde(default)]
    pub name: String,
}

/// YAML frontmatter of a message `.md` file
///
/// The `date` field matches the filename's timestamp prefix to the second
/// (UTC); `storage::write_message` enforces that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrontmatter {
    /// Composite identifier `<thread_id>/<message_id>`
    pub id: String,
    /// Provider id when available, otherwise the IMAP UID
    pub message_id: String,
    /// Owning thread
    pub thread_id: String,
    /// RFC 822 `Message-ID` header, may be empty
    pub rfc822_message_id: String,
    /// RFC 822 `In-Reply-To` header, may be empty
    pub in_reply_to: String,
    /// RFC 822 `References`, split on whitespace
    pub references: Vec<String>,
    /// Sender
    pub from: Address,
    /// Primary recipients
    pub to: Vec<Address>,
    /// Carbon-copy recipients
    pub cc: Vec<Address>,
    /// Message date, RFC 3339 UTC
    pub date: String,
    /// IMAP UID when the message came off the IMAP path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
}

/// Outbox draft action
///
/// Internally tagged on the draft's `action` field; a `reply` without a
/// `thread_id` fails deserialization, which is the validation the outbox
/// wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DraftAction {
    /// Start a new thread
    Compose,
    /// Reply within an existing thread
    Reply {
        /// Thread the reply belongs to
        thread_id: String,
    },
}

/// Outbox draft lifecycle status
///
/// Allowed transitions: `pending_review → ready_to_send → sending → sent`
/// with `sending → failed` as the error terminal. Everything else is
/// rejected by `outbox::transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Awaiting human review (initial state from producers)
    PendingReview,
    /// Approved, waiting for the watcher to dispatch
    ReadyToSend,
    /// Handed to the SMTP transport
    Sending,
    /// Delivered; the file lives in `sent/`
    Sent,
    /// Dispatch failed; the file lives in `failed/`
    Failed,
}

impl DraftStatus {
    /// Whether the status ends the draft's life in the outbox
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// Attachment reference inside an outbound draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAttachment {
    /// Filename presented to the recipient
    pub filename: String,
    /// Absolute path read at dispatch time
    pub path: String,
    /// Declared MIME type
    #[serde(default = "default_attachment_mime")]
    pub mime_type: String,
}

fn default_attachment_mime() -> String {
    "application/octet-stream".to_owned()
}

/// A JSON draft dropped into the outbox by an external producer
///
/// Parsed into a typed value on ingest; shape errors surface before any
/// state transition happens. Terminal metadata (`sent_at`, `failed_at`,
/// `provider_message_id`, `error`) is attached by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Compose or reply (reply carries its mandatory thread id)
    #[serde(flatten)]
    pub action: DraftAction,
    /// Recipient addresses, at least one, each containing `@`
    pub to: Vec<String>,
    /// Carbon-copy addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Attachments read from absolute paths at dispatch time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<DraftAttachment>,
    /// Producer-supplied creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Producer identity (agent name, tool, user)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Lifecycle status
    pub status: DraftStatus,
    /// Set on the `sent` transition, RFC 3339 UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    /// Set on the `failed` transition, RFC 3339 UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    /// Provider message id returned by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    /// Human-readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a completed sync pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Threads created or updated by the pass
    pub threads_touched: usize,
    /// Message files written (including idempotent rewrites)
    pub messages_written: usize,
    /// Highest UID observed; `0` when the pass saw no messages
    pub last_uid: u64,
}

/// Format a timestamp the way every corpus file records dates
///
/// RFC 3339, second precision, UTC `Z` suffix.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::{Draft, DraftAction, DraftStatus, ParticipantRole};

    #[test]
    fn draft_reply_requires_thread_id() {
        let ok: Draft = serde_json::from_str(
            r#"{"action":"reply","thread_id":"t1","to":["a@b.com"],"subject":"s","body":"b","status":"pending_review"}"#,
        )
        .expect("reply with thread_id parses");
        assert_eq!(
            ok.action,
            DraftAction::Reply {
                thread_id: "t1".to_owned()
            }
        );

        let err = serde_json::from_str::<Draft>(
            r#"{"action":"reply","to":["a@b.com"],"subject":"s","body":"b","status":"pending_review"}"#,
        );
        assert!(err.is_err(), "reply without thread_id must not parse");
    }

    #[test]
    fn draft_round_trips_status_names() {
        let draft: Draft = serde_json::from_str(
            r#"{"action":"compose","to":["a@b.com"],"subject":"s","body":"b","status":"ready_to_send"}"#,
        )
        .expect("parses");
        assert_eq!(draft.status, DraftStatus::ReadyToSend);

        let text = serde_json::to_string(&draft).expect("serializes");
        assert!(text.contains("\"ready_to_send\""));
        assert!(text.contains("\"compose\""));
    }

    #[test]
    fn terminal_statuses_are_sent_and_failed() {
        assert!(DraftStatus::Sent.is_terminal());
        assert!(DraftStatus::Failed.is_terminal());
        assert!(!DraftStatus::Sending.is_terminal());
        assert!(!DraftStatus::PendingReview.is_terminal());
    }

    #[test]
    fn participant_role_serializes_as_self_and_external() {
        assert_eq!(
            serde_json::to_string(&ParticipantRole::Owner).unwrap(),
            "\"self\""
        );
        assert_eq!(
            serde_json::to_string(&ParticipantRole::External).unwrap(),
            "\"external\""
        );
    }
}
