//! Outbox directory watcher
//!
//! Observes `outbox/` for JSON drafts and drives them through the state
//! machine. External producers (agents, editors) write drafts
//! non-atomically, so a file is only picked up after its size has held
//! still for 500 ms — that debounce window is a contract of the outbox,
//! not a tuning knob.
//!
//! `notify` callbacks run on their own thread; events are forwarded into
//! a tokio channel and processed on the async executor. One watcher runs
//! per account and drafts are processed sequentially, so at most one
//! dispatch is in flight per draft filename.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::models::DraftStatus;
use crate::outbox::{self, TransitionExtra};
use crate::paths::Corpus;
use crate::smtp::MailTransport;

/// Size-stability window a draft must satisfy before processing
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
/// Debounce polls before a still-changing file is given up on
const MAX_DEBOUNCE_POLLS: u32 = 20;

/// Per-account outbox watcher
pub struct OutboxWatcher {
    corpus: Corpus,
    account: String,
    review_before_send: bool,
    transport: Arc<dyn MailTransport>,
    cancel: CancellationToken,
}

impl OutboxWatcher {
    /// Create a watcher for one account's outbox
    pub fn new(
        corpus: Corpus,
        account: impl Into<String>,
        review_before_send: bool,
        transport: Arc<dyn MailTransport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            corpus,
            account: account.into(),
            review_before_send,
            transport,
            cancel,
        }
    }

    /// Watch until cancelled
    ///
    /// Sweeps pre-existing outbox files first (crash recovery), then
    /// reacts to create/modify events. Watcher errors end the loop; the
    /// supervisor decides whether to restart.
    pub async fn run(self) -> Result<()> {
        let outbox_dir = self.corpus.outbox_dir(&self.account);
        fs::create_dir_all(&outbox_dir)?;

        self.sweep_existing().await;

        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(64);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Internal(format!("failed to create outbox watcher: {e}")))?;
        watcher
            .watch(&outbox_dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Internal(format!("failed to watch outbox: {e}")))?;
        info!(account = %self.account, path = %outbox_dir.display(), "watching outbox");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(Ok(event)) => {
                            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                                for path in &event.paths {
                                    if let Some(name) = draft_filename(path) {
                                        self.handle_draft(&name).await;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(account = %self.account, error = %e, "outbox watcher error");
                        }
                        None => break,
                    }
                }
            }
        }
        info!(account = %self.account, "outbox watcher stopped");
        Ok(())
    }

    /// Process every draft already sitting in the outbox
    ///
    /// Run at startup so drafts dropped while the daemon was down (or
    /// left mid-lifecycle by a crash) are picked up without an event.
    async fn sweep_existing(&self) {
        let outbox_dir = self.corpus.outbox_dir(&self.account);
        let Ok(entries) = fs::read_dir(&outbox_dir) else {
            return;
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Some(name) = draft_filename(&entry.path()) {
                self.handle_draft(&name).await;
            }
        }
    }

    /// Debounce, then process one draft; per-draft failures only log
    async fn handle_draft(&self, filename: &str) {
        let path = self.corpus.outbox_file(&self.account, filename);
        match wait_for_stable_size(&path).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => return,
            Err(e) => {
                warn!(account = %self.account, draft = filename, error = %e, "draft never settled");
                return;
            }
        }
        if let Err(e) = self.process_draft(filename).await {
            warn!(account = %self.account, draft = filename, error = %e, "draft processing failed");
        }
    }

    /// Run one settled draft through the state machine
    ///
    /// Parse or validation failures surface as errors and leave the file
    /// untouched for the producer to fix. Dispatch outcome is recorded by
    /// the terminal transition — an SMTP send already in flight is never
    /// abandoned, its actual result lands in `sent/` or `failed/`.
    pub async fn process_draft(&self, filename: &str) -> Result<()> {
        let mut draft = match outbox::read_draft(&self.corpus, &self.account, filename) {
            Ok(draft) => draft,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if draft.status == DraftStatus::PendingReview {
            if self.review_before_send {
                debug!(account = %self.account, draft = filename, "draft awaiting review");
                return Ok(());
            }
            draft = outbox::transition(
                &self.corpus,
                &self.account,
                filename,
                DraftStatus::ReadyToSend,
                TransitionExtra::default(),
            )?;
        }

        if draft.status != DraftStatus::ReadyToSend {
            debug!(
                account = %self.account,
                draft = filename,
                status = ?draft.status,
                "draft not ready for dispatch"
            );
            return Ok(());
        }

        let draft = outbox::transition(
            &self.corpus,
            &self.account,
            filename,
            DraftStatus::Sending,
            TransitionExtra::default(),
        )?;

        match self.transport.send(&self.account, &draft).await {
            Ok(outcome) => {
                outbox::transition(
                    &self.corpus,
                    &self.account,
                    filename,
                    DraftStatus::Sent,
                    TransitionExtra {
                        provider_message_id: Some(outcome.provider_message_id),
                        error: None,
                    },
                )?;
            }
            Err(e) => {
                outbox::transition(
                    &self.corpus,
                    &self.account,
                    filename,
                    DraftStatus::Failed,
                    TransitionExtra {
                        provider_message_id: None,
                        error: Some(e.to_string()),
                    },
                )?;
            }
        }
        Ok(())
    }
}

/// Extract a processable draft filename from an event path
///
/// `.json` only, and never `.tmp` — atomic-writer temp files and
/// editors' scratch files are invisible to the lifecycle.
fn draft_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(".tmp") || !name.ends_with(".json") {
        return None;
    }
    Some(name.to_owned())
}

/// Wait until a file's size has been stable for the debounce window
///
/// # Errors
///
/// - `NotFound` when the file disappears while waiting
/// - `Timeout` when the size keeps changing past the poll budget
async fn wait_for_stable_size(path: &Path) -> Result<()> {
    let mut last = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Err(Error::NotFound(format!("{} vanished", path.display()))),
    };
    for _ in 0..MAX_DEBOUNCE_POLLS {
        sleep(DEBOUNCE_WINDOW).await;
        let Ok(meta) = fs::metadata(path) else {
            return Err(Error::NotFound(format!("{} vanished", path.display())));
        };
        let current = meta.len();
        if current == last && current > 0 {
            return Ok(());
        }
        last = current;
    }
    Err(Error::Timeout(format!(
        "{} size never stabilized",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::{OutboxWatcher, draft_filename, wait_for_stable_size};
    use crate::errors::Result;
    use crate::models::Draft;
    use crate::paths::Corpus;
    use crate::smtp::{MailTransport, SendOutcome};

    /// Transport double recording every dispatch
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, _from: &str, draft: &Draft) -> Result<SendOutcome> {
            if let Some(error) = &self.fail_with {
                return Err(crate::errors::Error::Smtp(error.clone()));
            }
            self.sent.lock().unwrap().push(draft.subject.clone());
            Ok(SendOutcome {
                provider_message_id: "prov-1".to_owned(),
            })
        }
    }

    fn watcher(
        corpus: Corpus,
        review_before_send: bool,
        fail_with: Option<String>,
    ) -> (Arc<RecordingTransport>, OutboxWatcher) {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            fail_with,
        });
        let watcher = OutboxWatcher::new(
            corpus,
            "me@gmail.com",
            review_before_send,
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            CancellationToken::new(),
        );
        (transport, watcher)
    }

    fn seed(corpus: &Corpus, filename: &str, status: &str) {
        crate::fsio::write_json_pretty(
            &corpus.outbox_file("me@gmail.com", filename),
            &json!({
                "action": "compose",
                "to": ["a@b.com"],
                "subject": "Hi",
                "body": "Hello",
                "status": status,
            }),
        )
        .expect("seed");
    }

    #[tokio::test]
    async fn auto_promoted_draft_travels_to_sent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        seed(&corpus, "d1.json", "pending_review");

        let (transport, watcher) = watcher(corpus.clone(), false, None);
        watcher.process_draft("d1.json").await.expect("process");

        assert_eq!(transport.sent.lock().unwrap().as_slice(), ["Hi"]);
        assert!(!corpus.outbox_file("me@gmail.com", "d1.json").exists());
        let text = std::fs::read_to_string(corpus.sent_file("me@gmail.com", "d1.json"))
            .expect("sent file");
        assert!(text.contains("\"sent\""));
        assert!(text.contains("sent_at"));
        assert!(text.contains("prov-1"));
    }

    #[tokio::test]
    async fn review_mode_leaves_pending_drafts_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        seed(&corpus, "d2.json", "pending_review");

        let (transport, watcher) = watcher(corpus.clone(), true, None);
        watcher.process_draft("d2.json").await.expect("process");

        assert!(transport.sent.lock().unwrap().is_empty());
        let text = std::fs::read_to_string(corpus.outbox_file("me@gmail.com", "d2.json"))
            .expect("still in outbox");
        assert!(text.contains("pending_review"));
    }

    #[tokio::test]
    async fn transport_failure_quarantines_the_draft() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        seed(&corpus, "d3.json", "ready_to_send");

        let (_transport, watcher) =
            watcher(corpus.clone(), true, Some("550 mailbox unavailable".to_owned()));
        watcher.process_draft("d3.json").await.expect("process");

        assert!(!corpus.outbox_file("me@gmail.com", "d3.json").exists());
        let text = std::fs::read_to_string(corpus.failed_file("me@gmail.com", "d3.json"))
            .expect("failed file");
        assert!(text.contains("550 mailbox unavailable"));
        assert!(text.contains("failed_at"));
    }

    #[tokio::test]
    async fn malformed_draft_is_left_for_the_producer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        let path = corpus.outbox_file("me@gmail.com", "bad.json");
        std::fs::create_dir_all(path.parent().unwrap()).expect("dirs");
        std::fs::write(&path, "{ not json").expect("seed");

        let (transport, watcher) = watcher(corpus.clone(), false, None);
        let err = watcher.process_draft("bad.json").await.expect_err("must fail");
        assert!(matches!(err, crate::errors::Error::Parse(_)));
        assert!(path.exists(), "file left in place");
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_draft_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = Corpus::new(dir.path());
        let (_transport, watcher) = watcher(corpus, false, None);
        watcher.process_draft("ghost.json").await.expect("no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn stability_wait_outlasts_a_slow_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grow.json");
        std::fs::write(&path, "{").expect("seed");

        let grower = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                std::fs::write(&path, "{\"ok\":true}").expect("grow");
            })
        };
        wait_for_stable_size(&path).await.expect("settles");
        grower.await.expect("grower");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{\"ok\":true}");
    }

    #[test]
    fn tmp_and_foreign_files_are_ignored() {
        assert_eq!(
            draft_filename(std::path::Path::new("/x/outbox/d.json")).as_deref(),
            Some("d.json")
        );
        assert!(draft_filename(std::path::Path::new("/x/outbox/d.json.abc123.tmp")).is_none());
        assert!(draft_filename(std::path::Path::new("/x/outbox/notes.txt")).is_none());
        assert!(draft_filename(std::path::Path::new("/x/outbox")).is_none());
    }
}
