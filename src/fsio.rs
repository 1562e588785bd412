//! Atomic filesystem primitives
//!
//! All corpus writes funnel through this module. The guarantee is
//! whole-file visibility: a reader opening any file sees either the
//! previous committed contents or the new committed contents, never a
//! truncated or interleaved state. This is enforced by writing to a
//! sibling temp file and renaming onto the target (rename is atomic on the
//! same filesystem).
//!
//! JSONL indexes are rewritten, not appended, so an upsert can replace a
//! record in place and keep the file sorted at rest.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{Error, Result};

/// Options for [`jsonl_upsert`]
///
/// `sort_by_desc` names a top-level string field; records are ordered by
/// that field descending before the rewrite (the threads index uses
/// `last_date`). `max_records` caps the file, dropping the tail after
/// sorting.
#[derive(Debug, Clone, Default)]
pub struct JsonlOptions {
    /// Field to sort by, descending, before writing
    pub sort_by_desc: Option<&'static str>,
    /// Maximum number of records to retain
    pub max_records: Option<usize>,
}

/// Write bytes to a path atomically
///
/// Creates parent directories, writes to `path.<uuid>.tmp`, then renames
/// onto the target. On rename failure the temp file is removed so no
/// orphan is left beside the target.
///
/// # Errors
///
/// Propagates I/O errors from directory creation, the write, or the
/// rename. The target is never left partially written.
pub fn atomic_write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::invalid(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid(format!("path has no filename: {}", path.display())))?;
    let tmp = parent.join(format!("{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Serialize a value as pretty JSON and write it atomically
///
/// Two-space indentation with a trailing newline, matching every JSON file
/// in the corpus.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    atomic_write_file(path, &body)
}

/// Read a JSONL file into a vector of JSON values
///
/// A missing file yields an empty vector. Lines that fail to parse are
/// dropped with a warning rather than poisoning the whole index.
pub fn read_jsonl(path: &Path) -> Result<Vec<serde_json::Value>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(v) => records.push(v),
            Err(e) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "dropping unparseable jsonl line");
            }
        }
    }
    Ok(records)
}

/// Insert or replace one record in a JSONL file, atomically
///
/// Matches on the string value of `key_field`. If a record with the same
/// key exists it is replaced in place; otherwise the record is appended.
/// After applying `options` (sort, cap) the whole file is rewritten via
/// [`atomic_write_file`], so readers see either the old index or the new
/// one.
///
/// # Errors
///
/// - `InvalidInput` if the new record lacks a string `key_field`
/// - I/O errors from the read or the atomic rewrite
pub fn jsonl_upsert(
    path: &Path,
    record: &serde_json::Value,
    key_field: &str,
    options: &JsonlOptions,
) -> Result<()> {
    let key = record
        .get(key_field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::invalid(format!("record is missing string key field '{key_field}'"))
        })?
        .to_owned();

    let mut records = read_jsonl(path)?;
    let existing = records
        .iter()
        .position(|r| r.get(key_field).and_then(|v| v.as_str()) == Some(key.as_str()));
    match existing {
        Some(idx) => records[idx] = record.clone(),
        None => records.push(record.clone()),
    }

    if let Some(field) = options.sort_by_desc {
        records.sort_by(|a, b| {
            let av = a.get(field).and_then(|v| v.as_str()).unwrap_or("");
            let bv = b.get(field).and_then(|v| v.as_str()).unwrap_or("");
            bv.cmp(av)
        });
    }
    if let Some(cap) = options.max_records {
        records.truncate(cap);
    }

    let mut body = Vec::with_capacity(records.len() * 256);
    for r in &records {
        serde_json::to_writer(&mut body, r)?;
        body.push(b'\n');
    }
    atomic_write_file(path, &body)
}
