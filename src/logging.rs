//! Log initialization
//!
//! Builds the global `tracing` subscriber exactly once, at process start.
//! Lines go to `BASE/logs/sync.log` as `[ISO-8601] [LEVEL] message`, the
//! format downstream tools grep. Stdout stays clean for the CLI's JSON
//! result lines; verbosity is controlled with `RUST_LOG`.

use std::fs;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::errors::{Error, Result};

/// Event formatter emitting `[ISO] [LEVEL] message` lines
struct SyncLogFormat;

impl<S, N> FormatEvent<S, N> for SyncLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        write!(writer, "[{now}] [{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber writing to the sync log
///
/// Creates the log directory, opens `sync.log` in append mode, and sets
/// the subscriber for the lifetime of the process. Call once from the
/// daemon supervisor or CLI entry; a second call is an error by design —
/// the logger's lifecycle is explicit, not ambient.
///
/// # Errors
///
/// - `Io` when the log directory or file cannot be created
/// - `Internal` when a global subscriber is already installed
pub fn init(log_file: &Path) -> Result<()> {
    let parent = log_file
        .parent()
        .ok_or_else(|| Error::invalid(format!("log path has no parent: {}", log_file.display())))?;
    fs::create_dir_all(parent)?;

    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .event_format(SyncLogFormat)
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| Error::Internal(format!("logger already initialized: {e}")))?;
    Ok(())
}
