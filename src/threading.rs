//! Thread grouping
//!
//! Assigns every message in a fetch batch to a thread. Reply headers win:
//! a message inherits the thread of the message its `In-Reply-To` (or the
//! first known entry of its `References`) points at. Messages with no
//! usable linkage fall back to a hash of the normalized subject, so a
//! "Re: Re: Fwd: Invoice" lands with "Invoice".
//!
//! The grouper is batch-local and restartable: it is re-run from scratch
//! per batch and does not attempt cross-batch stitching. A late reply
//! whose parent lies outside the current batch joins by subject hash, not
//! by reference; joining against threads already on disk is a known
//! future feature, not a bug.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Bytes of raw source scanned for threading headers
const HEADER_SCAN_BYTES: usize = 8 * 1024;

static REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\s*(?:re|fw|fwd)\s*:\s*)+").unwrap());

/// Threading-relevant headers pulled from a raw message
#[derive(Debug, Clone, Default)]
pub struct ThreadHeaders {
    /// `Message-ID`, angle brackets stripped
    pub message_id: String,
    /// `In-Reply-To`, angle brackets stripped
    pub in_reply_to: String,
    /// `References` entries in header order
    pub references: Vec<String>,
    /// `Subject`, raw
    pub subject: String,
}

/// A message paired with its assigned thread
#[derive(Debug, Clone)]
pub struct GroupedMessage<T> {
    /// Assigned thread identifier
    pub thread_id: String,
    /// The message itself
    pub message: T,
}

/// Group a batch of messages into threads
///
/// `raw` extracts the message source from an item. Items keep their batch
/// order inside their thread groups; thread order follows first
/// appearance. The id fallback chain per message: inherited via
/// `In-Reply-To`, inherited via the first known `References` entry,
/// subject hash, hash of the message id, hash of `fallback_key` (the
/// caller passes the UID here).
pub fn group_into_threads<T>(
    batch: Vec<T>,
    raw: impl Fn(&T) -> &[u8],
    fallback_key: impl Fn(&T) -> String,
) -> Vec<(String, Vec<T>)> {
    let mut by_message_id: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<T>> = HashMap::new();

    for item in batch {
        let headers = scan_headers(raw(&item));
        let thread_id = assign_thread_id(&headers, &by_message_id, || fallback_key(&item));

        if !headers.message_id.is_empty() {
            by_message_id
                .entry(headers.message_id.clone())
                .or_insert_with(|| thread_id.clone());
        }
        if !groups.contains_key(&thread_id) {
            order.push(thread_id.clone());
        }
        groups.entry(thread_id).or_default().push(item);
    }

    order
        .into_iter()
        .map(|id| {
            let members = groups.remove(&id).unwrap_or_default();
            (id, members)
        })
        .collect()
}

/// Pick the thread id for one message given the batch map so far
fn assign_thread_id(
    headers: &ThreadHeaders,
    by_message_id: &HashMap<String, String>,
    fallback_key: impl FnOnce() -> String,
) -> String {
    if !headers.in_reply_to.is_empty()
        && let Some(existing) = by_message_id.get(&headers.in_reply_to)
    {
        return existing.clone();
    }
    for reference in &headers.references {
        if let Some(existing) = by_message_id.get(reference) {
            return existing.clone();
        }
    }

    let normalized = normalize_subject(&headers.subject);
    if !normalized.is_empty() {
        return subject_hash(&normalized);
    }
    if !headers.message_id.is_empty() {
        return subject_hash(&headers.message_id);
    }
    subject_hash(&fallback_key())
}

/// Cheap header scan over the first 8 KiB of raw source
///
/// No MIME parse: the scan unfolds continuation lines, stops at the blank
/// line ending the header block, and matches the four threading headers
/// case-insensitively.
pub fn scan_headers(raw: &[u8]) -> ThreadHeaders {
    let window = &raw[..raw.len().min(HEADER_SCAN_BYTES)];
    let text = String::from_utf8_lossy(window);

    let header_block = match text.find("\r\n\r\n").or_else(|| text.find("\n\n")) {
        Some(end) => &text[..end],
        None => &text,
    };
    let unfolded = header_block
        .replace("\r\n ", " ")
        .replace("\r\n\t", " ")
        .replace("\n ", " ")
        .replace("\n\t", " ");

    let mut headers = ThreadHeaders::default();
    for line in unfolded.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "message-id" => headers.message_id = strip_brackets(value),
            "in-reply-to" => headers.in_reply_to = strip_brackets(value),
            "references" => {
                headers.references = value
                    .split_whitespace()
                    .map(strip_brackets)
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "subject" => headers.subject = value.to_owned(),
            _ => {}
        }
    }
    headers
}

fn strip_brackets(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_owned()
}

/// Normalize a subject for hashing
///
/// Strips repeated leading `re:`/`fw:`/`fwd:` markers, lowercases, trims.
pub fn normalize_subject(subject: &str) -> String {
    REPLY_PREFIX
        .replace(subject.trim(), "")
        .trim()
        .to_ascii_lowercase()
}

/// Deterministic 32-bit hash rendered base-36, zero-padded to 8 chars
///
/// FNV-1a; stable across runs and platforms so thread directories keep
/// their names between syncs.
pub fn subject_hash(input: &str) -> String {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    to_base36_padded(hash)
}

/// Render a u32 in base-36, zero-padded to 8 characters
fn to_base36_padded(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = [b'0'; 8];
    let mut idx = 8;
    loop {
        idx -= 1;
        out[idx] = DIGITS[(value % 36) as usize];
        value /= 36;
        if value == 0 || idx == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
