//! Corpus storage writer
//!
//! Persists threads, messages, attachments, and the JSONL indexes, all
//! through the atomic writers. Writes happen in dependency order (thread
//! directory, messages, attachments, thread.json, index entry), so a sync
//! that dies mid-thread leaves a readable, self-consistent corpus.
//!
//! Message files are named `YYYYMMDDTHHMMSSZ__msg<id>.md` — the timestamp
//! prefix makes a plain directory listing chronological, and it matches
//! the frontmatter `date` to the second by construction.

use std::fs;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::{Error, Result};
use crate::fsio::{self, JsonlOptions};
use crate::mime::ParsedAttachment;
use crate::models::{
    AttachmentMeta, ContactEntry, MAX_ATTACHMENT_BYTES, MessageFrontmatter, ThreadIndexEntry,
    ThreadMeta,
};
use crate::paths::{Corpus, sanitize_filename};

/// Timestamp layout shared by filenames and their parser
const FILENAME_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Writer for one account's corpus subtree
///
/// Index upserts are serialized through an internal mutex; the JSONL
/// files are the only corpus resource shared between call sites.
pub struct StorageWriter {
    corpus: Corpus,
    account: String,
    index_lock: Mutex<()>,
}

impl StorageWriter {
    /// Create a writer for an account
    pub fn new(corpus: Corpus, account: impl Into<String>) -> Self {
        Self {
            corpus,
            account: account.into(),
            index_lock: Mutex::new(()),
        }
    }

    /// Owning account address
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Path resolver this writer was built over
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Create the full account directory tree
    ///
    /// Idempotent; called at the start of a full sync and by the daemon
    /// before watching the outbox.
    pub fn ensure_account_tree(&self) -> Result<()> {
        for dir in [
            self.corpus.index_dir(&self.account),
            self.corpus.threads_dir(&self.account),
            self.corpus.outbox_dir(&self.account),
            self.corpus.sent_dir(&self.account),
            self.corpus.failed_dir(&self.account),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Write `thread.json`, creating the thread directory
    pub fn write_thread_meta(&self, meta: &ThreadMeta) -> Result<()> {
        fs::create_dir_all(self.corpus.thread_dir(&self.account, &meta.id))?;
        fsio::write_json_pretty(&self.corpus.thread_meta_file(&self.account, &meta.id), meta)
    }

    /// Write one message `.md` file, returning its generated filename
    ///
    /// The filename timestamp comes from the frontmatter `date`, so the
    /// prefix and the metadata can never disagree. Writing the same
    /// `(frontmatter, body)` twice produces the same filename and
    /// byte-identical contents.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the frontmatter date is not RFC 3339
    /// - I/O errors from the atomic writer
    pub fn write_message(
        &self,
        thread_id: &str,
        frontmatter: &MessageFrontmatter,
        body: &str,
    ) -> Result<String> {
        let date = DateTime::parse_from_rfc3339(&frontmatter.date)
            .map_err(|e| Error::invalid(format!("frontmatter date '{}': {e}", frontmatter.date)))?
            .with_timezone(&Utc);
        let filename = format_message_filename(date, &frontmatter.message_id);

        let mut doc = String::with_capacity(body.len() + 512);
        doc.push_str("---\n");
        doc.push_str(&render_frontmatter(frontmatter));
        doc.push_str("---\n\n");
        doc.push_str(body.trim_end_matches('\n'));
        doc.push('\n');

        let path = self
            .corpus
            .message_file(&self.account, thread_id, &filename);
        fsio::atomic_write_file(&path, doc.as_bytes())?;
        Ok(filename)
    }

    /// Persist a message's attachments, returning their records
    ///
    /// Filenames are sanitized; payloads above [`MAX_ATTACHMENT_BYTES`]
    /// are recorded with `skipped: true` and never written.
    pub fn write_attachments(
        &self,
        thread_id: &str,
        parsed: &[ParsedAttachment],
    ) -> Result<Vec<AttachmentMeta>> {
        let mut records = Vec::with_capacity(parsed.len());
        for attachment in parsed {
            let filename = sanitize_filename(attachment.filename.as_deref().unwrap_or(""));
            let skipped = attachment.size > MAX_ATTACHMENT_BYTES;
            if !skipped {
                let path = self
                    .corpus
                    .attachment_file(&self.account, thread_id, &filename);
                fsio::atomic_write_file(&path, &attachment.bytes)?;
            }
            records.push(AttachmentMeta {
                filename,
                mime_type: attachment.content_type.clone(),
                size_bytes: attachment.size,
                skipped,
            });
        }
        Ok(records)
    }

    /// Upsert one entry in `threads.jsonl`, keeping `last_date` order
    pub fn upsert_thread_index(&self, entry: &ThreadIndexEntry) -> Result<()> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        fsio::jsonl_upsert(
            &self.corpus.threads_index(&self.account),
            &serde_json::to_value(entry)?,
            "id",
            &JsonlOptions {
                sort_by_desc: Some("last_date"),
                max_records: None,
            },
        )
    }

    /// Upsert one entry in `contacts.jsonl` by address
    pub fn upsert_contact_index(&self, entry: &ContactEntry) -> Result<()> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        fsio::jsonl_upsert(
            &self.corpus.contacts_index(&self.account),
            &serde_json::to_value(entry)?,
            "email",
            &JsonlOptions::default(),
        )
    }

    /// Read the current contact record for an address, if any
    pub fn read_contact(&self, email: &str) -> Result<Option<ContactEntry>> {
        let records = fsio::read_jsonl(&self.corpus.contacts_index(&self.account))?;
        for record in records {
            if record.get("email").and_then(|v| v.as_str()) == Some(email) {
                return Ok(Some(serde_json::from_value(record)?));
            }
        }
        Ok(None)
    }

    /// Read thread metadata back from disk, if the thread exists
    pub fn read_thread_meta(&self, thread_id: &str) -> Result<Option<ThreadMeta>> {
        let path = self.corpus.thread_meta_file(&self.account, thread_id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build a message filename from its date and id
pub fn format_message_filename(date: DateTime<Utc>, message_id: &str) -> String {
    format!(
        "{}__msg{}.md",
        date.format(FILENAME_TS_FORMAT),
        sanitize_filename(message_id)
    )
}

/// Parse a message filename back into `(date, id)`
///
/// Inverse of [`format_message_filename`] for every representable pair.
pub fn parse_message_filename(filename: &str) -> Option<(DateTime<Utc>, String)> {
    let stem = filename.strip_suffix(".md")?;
    let (ts, id) = stem.split_once("__msg")?;
    let naive = NaiveDateTime::parse_from_str(ts, FILENAME_TS_FORMAT).ok()?;
    Some((naive.and_utc(), id.to_owned()))
}

/// Render frontmatter as YAML lines (no delimiters)
fn render_frontmatter(fm: &MessageFrontmatter) -> String {
    let mut out = String::with_capacity(512);
    push_scalar(&mut out, "id", &fm.id);
    push_scalar(&mut out, "message_id", &fm.message_id);
    push_scalar(&mut out, "thread_id", &fm.thread_id);
    push_scalar(&mut out, "rfc822_message_id", &fm.rfc822_message_id);
    push_scalar(&mut out, "in_reply_to", &fm.in_reply_to);
    push_list(&mut out, "references", &fm.references);
    push_scalar(
        &mut out,
        "from",
        &format_address(&fm.from.email, &fm.from.name),
    );
    let to: Vec<String> = fm
        .to
        .iter()
        .map(|a| format_address(&a.email, &a.name))
        .collect();
    push_list(&mut out, "to", &to);
    let cc: Vec<String> = fm
        .cc
        .iter()
        .map(|a| format_address(&a.email, &a.name))
        .collect();
    push_list(&mut out, "cc", &cc);
    push_scalar(&mut out, "date", &fm.date);
    if let Some(uid) = fm.uid {
        out.push_str(&format!("uid: {uid}\n"));
    }
    out
}

/// Render an address with optional display name
fn format_address(email: &str, name: &str) -> String {
    if name.trim().is_empty() {
        email.to_owned()
    } else {
        format!("{name} <{email}>")
    }
}

fn push_scalar(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(&yaml_scalar(value));
    out.push('\n');
}

fn push_list(out: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        out.push_str(key);
        out.push_str(": []\n");
        return;
    }
    out.push_str(key);
    out.push_str(":\n");
    for value in values {
        out.push_str("  - ");
        out.push_str(&yaml_scalar(value));
        out.push('\n');
    }
}

/// Quote a YAML scalar when it could be misread bare
///
/// Double-quotes values containing YAML-special characters
/// (`:#[]{}|>&*!'`), a leading `-`, leading or trailing whitespace,
/// embedded quotes/backslashes/newlines, or nothing at all. Inside
/// quotes, `\` and `"` are escaped.
fn yaml_scalar(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.starts_with('-')
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value
            .chars()
            .any(|c| ":#[]{}|>&*!'\"\\\n".contains(c));
    if !needs_quoting {
        return value.to_owned();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        StorageWriter, format_message_filename, parse_message_filename, yaml_scalar,
    };
    use crate::mime::ParsedAttachment;
    use crate::models::{
        Address, AttachmentMeta, ContactEntry, MessageFrontmatter, ThreadIndexEntry, ThreadMeta,
    };
    use crate::paths::Corpus;

    fn writer() -> (tempfile::TempDir, StorageWriter) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageWriter::new(Corpus::new(dir.path()), "me@gmail.com");
        (dir, storage)
    }

    fn frontmatter(date: &str, message_id: &str) -> MessageFrontmatter {
        MessageFrontmatter {
            id: format!("t1/{message_id}"),
            message_id: message_id.to_owned(),
            thread_id: "t1".to_owned(),
            rfc822_message_id: "m@x".to_owned(),
            in_reply_to: String::new(),
            references: vec![],
            from: Address {
                email: "jane@example.com".to_owned(),
                name: "Jane".to_owned(),
            },
            to: vec![Address {
                email: "me@gmail.com".to_owned(),
                name: String::new(),
            }],
            cc: vec![],
            date: date.to_owned(),
            uid: Some(42),
        }
    }

    #[test]
    fn filename_round_trips() {
        let date = Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap();
        let name = format_message_filename(date, "42");
        assert_eq!(name, "20260210T093000Z__msg42.md");
        let (parsed_date, parsed_id) = parse_message_filename(&name).expect("parses");
        assert_eq!(parsed_date, date);
        assert_eq!(parsed_id, "42");
    }

    #[test]
    fn filename_prefix_matches_frontmatter_date() {
        let (_dir, storage) = writer();
        let fm = frontmatter("2026-02-10T09:30:00Z", "42");
        let name = storage.write_message("t1", &fm, "body").expect("write");
        assert!(name.starts_with("20260210T093000Z__"));
    }

    #[test]
    fn message_document_is_framed_and_idempotent() {
        let (dir, storage) = writer();
        let fm = frontmatter("2026-02-10T09:30:00Z", "42");

        let name = storage.write_message("t1", &fm, "Hello body\n\n").expect("write");
        let path = dir
            .path()
            .join("accounts/me@gmail.com/threads/t1/messages")
            .join(&name);
        let first = std::fs::read_to_string(&path).expect("read");
        assert!(first.starts_with("---\n"));
        assert!(first.contains("\n---\n\nHello body\n"));
        assert!(first.ends_with('\n'));
        assert!(first.contains("from: Jane <jane@example.com>"));
        assert!(first.contains("uid: 42"));

        let again = storage.write_message("t1", &fm, "Hello body\n\n").expect("rewrite");
        assert_eq!(again, name);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), first);
    }

    #[test]
    fn yaml_scalars_quote_special_characters() {
        assert_eq!(yaml_scalar("plain words"), "plain words");
        assert_eq!(yaml_scalar("has: colon"), "\"has: colon\"");
        assert_eq!(yaml_scalar("-leading dash"), "\"-leading dash\"");
        assert_eq!(yaml_scalar(" leading space"), "\" leading space\"");
        assert_eq!(yaml_scalar("a[b]{c}"), "\"a[b]{c}\"");
        assert_eq!(yaml_scalar(""), "\"\"");
        assert_eq!(yaml_scalar("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(yaml_scalar("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn oversize_attachment_is_recorded_but_not_written() {
        let (dir, storage) = writer();
        let attachments = vec![
            ParsedAttachment {
                filename: Some("big.bin".to_owned()),
                content_type: "application/octet-stream".to_owned(),
                bytes: Vec::new(),
                size: 12 * 1024 * 1024,
                content_id: None,
            },
            ParsedAttachment {
                filename: Some("small.txt".to_owned()),
                content_type: "text/plain".to_owned(),
                bytes: b"tiny".to_vec(),
                size: 4,
                content_id: None,
            },
        ];

        let records = storage.write_attachments("t1", &attachments).expect("write");
        assert_eq!(records.len(), 2);
        assert!(records[0].skipped);
        assert!(!records[1].skipped);

        let att_dir = dir.path().join("accounts/me@gmail.com/threads/t1/attachments");
        assert!(!att_dir.join("big.bin").exists());
        assert_eq!(std::fs::read(att_dir.join("small.txt")).expect("read"), b"tiny");
    }

    #[test]
    fn nameless_attachment_gets_default_filename() {
        let (dir, storage) = writer();
        let records = storage
            .write_attachments(
                "t1",
                &[ParsedAttachment {
                    filename: None,
                    content_type: "application/pdf".to_owned(),
                    bytes: b"%PDF".to_vec(),
                    size: 4,
                    content_id: None,
                }],
            )
            .expect("write");
        assert_eq!(records[0].filename, "attachment");
        assert!(
            dir.path()
                .join("accounts/me@gmail.com/threads/t1/attachments/attachment")
                .exists()
        );
    }

    #[test]
    fn thread_meta_round_trips() {
        let (_dir, storage) = writer();
        let meta = ThreadMeta {
            id: "t1".to_owned(),
            subject: "Kickoff".to_owned(),
            labels: vec!["inbox".to_owned()],
            unread: true,
            starred: false,
            participants: vec![],
            first_date: "2026-02-10T09:30:00Z".to_owned(),
            last_date: "2026-02-11T10:00:00Z".to_owned(),
            message_count: 2,
            has_attachments: false,
            attachments: Vec::<AttachmentMeta>::new(),
        };
        storage.write_thread_meta(&meta).expect("write");
        let loaded = storage
            .read_thread_meta("t1")
            .expect("read")
            .expect("present");
        assert_eq!(loaded.subject, "Kickoff");
        assert_eq!(loaded.message_count, 2);
    }

    #[test]
    fn contact_upsert_replaces_by_email() {
        let (_dir, storage) = writer();
        let mut entry = ContactEntry {
            email: "jane@example.com".to_owned(),
            name: "Jane".to_owned(),
            first_seen: "2026-01-01T00:00:00Z".to_owned(),
            last_seen: "2026-01-01T00:00:00Z".to_owned(),
            msg_count: 1,
            common_labels: vec![],
            is_frequent: false,
        };
        storage.upsert_contact_index(&entry).expect("insert");
        entry.msg_count = 5;
        entry.is_frequent = true;
        storage.upsert_contact_index(&entry).expect("replace");

        let loaded = storage
            .read_contact("jane@example.com")
            .expect("read")
            .expect("present");
        assert_eq!(loaded.msg_count, 5);
        assert!(loaded.is_frequent);
    }

    #[test]
    fn thread_index_stays_sorted_by_last_date() {
        let (_dir, storage) = writer();
        for (id, date) in [
            ("t1", "2026-02-10T00:00:00Z"),
            ("t2", "2026-02-20T00:00:00Z"),
            ("t3", "2026-02-15T00:00:00Z"),
        ] {
            storage
                .upsert_thread_index(&ThreadIndexEntry {
                    id: id.to_owned(),
                    subject: "s".to_owned(),
                    from: "a@b.com".to_owned(),
                    from_name: String::new(),
                    participants: vec![],
                    labels: vec![],
                    unread: false,
                    starred: false,
                    msg_count: 1,
                    last_date: date.to_owned(),
                    first_date: date.to_owned(),
                    snippet: String::new(),
                    has_attachments: false,
                    size_bytes: 0,
                })
                .expect("upsert");
        }

        let records = crate::fsio::read_jsonl(
            &storage.corpus().threads_index(storage.account()),
        )
        .expect("read");
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["t2", "t3", "t1"]);
    }
}
