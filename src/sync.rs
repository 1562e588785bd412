//! Sync operations
//!
//! Three named passes over an account's mailbox, all sharing one
//! downstream pipeline: group the fetched batch into threads, clean each
//! message, write messages and attachments, then thread metadata, then
//! index entries. Errors stay contained — a bad message skips the
//! message, a bad thread skips the thread, and only writer I/O failures
//! end the pass.
//!
//! The pipeline is deliberately split from the network: [`process_batch`]
//! takes fetched messages and a storage writer, nothing else, so the
//! whole corpus path is exercisable with literal RFC 822 bytes.

use std::collections::HashMap;
use std::fs;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clean;
use crate::errors::Result;
use crate::imap::{FetchedMessage, ImapClient};
use crate::mime::{self, ParsedEmail};
use crate::models::{
    Address, AttachmentMeta, ContactEntry, MessageFrontmatter, Participant, ParticipantRole,
    SyncReport, ThreadIndexEntry, ThreadMeta, format_utc,
};
use crate::storage::StorageWriter;
use crate::threading;

/// Which pass to run
#[derive(Debug, Clone, Copy)]
pub enum SyncPass {
    /// Initialize the tree and fetch the archive window
    Full {
        /// Days of history to fetch
        days: u32,
        /// Cap on messages, newest win
        max: Option<usize>,
    },
    /// Fetch everything above the high-water mark
    Incremental {
        /// Current high-water mark
        last_uid: u64,
    },
    /// Fetch unseen inbox messages; the high-water mark is untouched
    Unread,
}

/// Run one sync pass end to end
///
/// Connects, fetches according to the pass, disconnects, and feeds the
/// batch through [`process_batch`]. The connection is dropped before
/// processing: cleaning is CPU work and has no business holding a
/// session open.
pub async fn run_sync(
    client: &mut ImapClient,
    storage: &StorageWriter,
    pass: SyncPass,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    storage.ensure_account_tree()?;

    client.connect().await?;
    let fetched = match pass {
        SyncPass::Full { days, max } => client.fetch_recent(days, max).await,
        SyncPass::Incremental { last_uid } => client.fetch_since(last_uid).await,
        SyncPass::Unread => client.fetch_unread().await,
    };
    client.disconnect().await;
    let batch = fetched?;

    info!(
        account = storage.account(),
        pass = ?pass,
        fetched = batch.len(),
        "sync pass fetched batch"
    );
    process_batch(storage, batch, cancel)
}

/// Run the storage pipeline over a fetched batch
///
/// Groups messages into threads and writes the corpus in dependency
/// order. Cancellation is honored between threads and between messages;
/// a cancelled pass returns what it completed, leaving the high-water
/// mark to reflect only finished threads.
pub fn process_batch(
    storage: &StorageWriter,
    batch: Vec<FetchedMessage>,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let groups = threading::group_into_threads(batch, |m| &m.raw, |m| m.uid.to_string());

    let mut report = SyncReport {
        threads_touched: 0,
        messages_written: 0,
        last_uid: 0,
    };
    for (thread_id, messages) in groups {
        if cancel.is_cancelled() {
            info!(account = storage.account(), "sync cancelled between threads");
            return Ok(report);
        }
        let thread_max_uid = messages.iter().map(|m| u64::from(m.uid)).max().unwrap_or(0);
        match write_thread(storage, &thread_id, messages, cancel) {
            Ok(written) => {
                report.threads_touched += 1;
                report.messages_written += written;
                report.last_uid = report.last_uid.max(thread_max_uid);
            }
            Err(e) if matches!(e, crate::errors::Error::Io(_)) => return Err(e),
            Err(e) => {
                warn!(thread = %thread_id, error = %e, "skipping thread");
            }
        }
    }
    Ok(report)
}

/// A message parsed and ready to write
struct PreparedMessage {
    uid: u32,
    flags: Vec<String>,
    email: ParsedEmail,
    text: String,
    snippet: String,
}

/// Write one thread: messages, attachments, metadata, index entries
fn write_thread(
    storage: &StorageWriter,
    thread_id: &str,
    messages: Vec<FetchedMessage>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut prepared: Vec<PreparedMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match mime::parse_email(&message.raw) {
            Ok(email) => {
                let cleaned = clean::clean_body(email.text_body.as_deref(), email.html_body.as_deref());
                prepared.push(PreparedMessage {
                    uid: message.uid,
                    flags: message.flags,
                    email,
                    text: cleaned.text,
                    snippet: cleaned.snippet,
                });
            }
            Err(e) => {
                warn!(uid = message.uid, error = %e, "skipping unparseable message");
            }
        }
    }
    if prepared.is_empty() {
        return Ok(0);
    }
    prepared.sort_by_key(|m| m.email.date);

    let account = storage.account().to_ascii_lowercase();
    let mut written = 0usize;
    let mut attachments: Vec<AttachmentMeta> = Vec::new();
    let mut body_bytes = 0usize;
    for message in &prepared {
        if cancel.is_cancelled() {
            break;
        }
        let frontmatter = build_frontmatter(thread_id, message);
        storage.write_message(thread_id, &frontmatter, &message.text)?;
        body_bytes += message.text.len();
        written += 1;

        if !message.email.attachments.is_empty() {
            let records = storage.write_attachments(thread_id, &message.email.attachments)?;
            for record in records {
                if !attachments.iter().any(|a| a.filename == record.filename) {
                    attachments.push(record);
                }
            }
        }
    }
    if written == 0 {
        return Ok(0);
    }

    let meta = build_thread_meta(storage, thread_id, &prepared[..written], &account, attachments)?;
    storage.write_thread_meta(&meta)?;

    let newest = &prepared[written - 1];
    storage.upsert_thread_index(&build_index_entry(&meta, newest, body_bytes))?;
    upsert_contacts(storage, &prepared[..written], &account)?;
    Ok(written)
}

/// Frontmatter for one prepared message
fn build_frontmatter(thread_id: &str, message: &PreparedMessage) -> MessageFrontmatter {
    let message_id = if message.uid > 0 {
        message.uid.to_string()
    } else {
        message.email.message_id.clone()
    };
    MessageFrontmatter {
        id: format!("{thread_id}/{message_id}"),
        message_id,
        thread_id: thread_id.to_owned(),
        rfc822_message_id: message.email.message_id.clone(),
        in_reply_to: message.email.in_reply_to.clone(),
        references: message.email.references.clone(),
        from: message.email.from.clone(),
        to: message.email.to.clone(),
        cc: message.email.cc.clone(),
        date: format_utc(message.email.date),
        uid: (message.uid > 0).then(|| u64::from(message.uid)),
    }
}

/// Merge thread metadata with whatever a previous sync left on disk
///
/// The subject is sticky: once a thread exists, later batches do not
/// retitle it. Counts come from the messages directory itself so resyncs
/// stay accurate.
fn build_thread_meta(
    storage: &StorageWriter,
    thread_id: &str,
    batch: &[PreparedMessage],
    account: &str,
    new_attachments: Vec<AttachmentMeta>,
) -> Result<ThreadMeta> {
    let existing = storage.read_thread_meta(thread_id)?;

    let batch_first = format_utc(batch[0].email.date);
    let batch_last = format_utc(batch[batch.len() - 1].email.date);
    let batch_unread = batch.iter().any(|m| !has_flag(&m.flags, "Seen"));
    let batch_starred = batch.iter().any(|m| has_flag(&m.flags, "Flagged"));

    let mut participants: Vec<Participant> =
        existing.as_ref().map(|m| m.participants.clone()).unwrap_or_default();
    for message in batch {
        for address in std::iter::once(&message.email.from)
            .chain(message.email.to.iter())
            .chain(message.email.cc.iter())
        {
            if address.email.is_empty() {
                continue;
            }
            if !participants.iter().any(|p| p.email == address.email) {
                participants.push(Participant {
                    email: address.email.clone(),
                    name: address.name.clone(),
                    role: if address.email == account {
                        ParticipantRole::Owner
                    } else {
                        ParticipantRole::External
                    },
                });
            }
        }
    }

    let mut attachments = existing.as_ref().map(|m| m.attachments.clone()).unwrap_or_default();
    for record in new_attachments {
        if !attachments.iter().any(|a| a.filename == record.filename) {
            attachments.push(record);
        }
    }

    let message_count = count_message_files(storage, thread_id);
    let (subject, labels, first_date, unread, starred) = match existing {
        Some(meta) => (
            meta.subject,
            meta.labels,
            meta.first_date.min(batch_first),
            meta.unread || batch_unread,
            meta.starred || batch_starred,
        ),
        None => (
            batch[0].email.subject.clone(),
            Vec::new(),
            batch_first,
            batch_unread,
            batch_starred,
        ),
    };

    Ok(ThreadMeta {
        id: thread_id.to_owned(),
        subject,
        labels,
        unread,
        starred,
        participants,
        first_date,
        last_date: batch_last,
        message_count,
        has_attachments: !attachments.is_empty(),
        attachments,
    })
}

/// Count `.md` files in a thread's messages directory
fn count_message_files(storage: &StorageWriter, thread_id: &str) -> usize {
    let dir = storage.corpus().messages_dir(storage.account(), thread_id);
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("md"))
                .count()
        })
        .unwrap_or(0)
}

/// Thread-index projection of merged metadata plus the newest message
fn build_index_entry(
    meta: &ThreadMeta,
    newest: &PreparedMessage,
    body_bytes: usize,
) -> ThreadIndexEntry {
    let sender = index_sender(meta, newest);
    ThreadIndexEntry {
        id: meta.id.clone(),
        subject: meta.subject.clone(),
        from: sender.email,
        from_name: sender.name,
        participants: meta.participants.iter().map(|p| p.email.clone()).collect(),
        labels: meta.labels.clone(),
        unread: meta.unread,
        starred: meta.starred,
        msg_count: meta.message_count,
        last_date: meta.last_date.clone(),
        first_date: meta.first_date.clone(),
        snippet: newest.snippet.clone(),
        has_attachments: meta.has_attachments,
        size_bytes: body_bytes,
    }
}

/// Pick the index `from`: the newest message's sender, falling back to
/// any external participant when the newest message had no usable sender
fn index_sender(meta: &ThreadMeta, newest: &PreparedMessage) -> Address {
    let from = &newest.email.from;
    if !from.email.is_empty() {
        return from.clone();
    }
    meta.participants
        .iter()
        .find(|p| p.role == ParticipantRole::External)
        .map(|p| Address {
            email: p.email.clone(),
            name: p.name.clone(),
        })
        .unwrap_or_else(|| Address {
            email: String::new(),
            name: String::new(),
        })
}

/// Merge contact records for every external sender in the batch
fn upsert_contacts(
    storage: &StorageWriter,
    batch: &[PreparedMessage],
    account: &str,
) -> Result<()> {
    let mut seen: HashMap<String, (String, String, usize)> = HashMap::new();
    for message in batch {
        let from = &message.email.from;
        if from.email.is_empty() || from.email == account {
            continue;
        }
        let date = format_utc(message.email.date);
        let entry = seen
            .entry(from.email.clone())
            .or_insert_with(|| (from.name.clone(), date.clone(), 0));
        if !from.name.is_empty() {
            entry.0 = from.name.clone();
        }
        entry.1 = entry.1.clone().max(date);
        entry.2 += 1;
    }

    for (email, (name, last_seen, count)) in seen {
        let merged = match storage.read_contact(&email)? {
            Some(existing) => {
                let msg_count = existing.msg_count + count;
                ContactEntry {
                    email,
                    name: if name.is_empty() { existing.name } else { name },
                    first_seen: existing.first_seen.min(last_seen.clone()),
                    last_seen: existing.last_seen.max(last_seen),
                    msg_count,
                    common_labels: existing.common_labels,
                    is_frequent: msg_count >= ContactEntry::FREQUENT_THRESHOLD,
                }
            }
            None => ContactEntry {
                email,
                name,
                first_seen: last_seen.clone(),
                last_seen,
                msg_count: count,
                common_labels: Vec::new(),
                is_frequent: count >= ContactEntry::FREQUENT_THRESHOLD,
            },
        };
        storage.upsert_contact_index(&merged)?;
    }
    Ok(())
}

fn has_flag(flags: &[String], name: &str) -> bool {
    flags.iter().any(|f| f.contains(name))
}
