//! IMAP transport and mailbox operations
//!
//! Wraps `async-imap` in an authenticated client with timeout-bounded
//! connection setup. All connections are TLS; plaintext IMAP is not
//! supported. Fetch streams themselves run unbounded — a deep mailbox
//! takes as long as it takes — while the connect/login phases carry a 60
//! second deadline.
//!
//! Every mailbox operation holds a process-local lock keyed by mailbox
//! path, released on all exit paths. Connections are opened per fetch
//! call and dropped afterwards; there is no pooling.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use chrono::{Duration as ChronoDuration, Utc};
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::OwnedMutexGuard;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::Credentials;
use crate::errors::{Error, Result};

/// Type alias for authenticated IMAP session over TLS
///
/// Wraps the TLS stream type to simplify signatures throughout the codebase.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Mailbox holding the complete message archive on Gmail
///
/// The label is locale-dependent; [`ImapClient::resolve_all_mail`] falls
/// back to the `\All` special-use attribute when this name is missing.
pub const ALL_MAIL: &str = "[Gmail]/All Mail";
/// The standard inbox
pub const INBOX: &str = "INBOX";

/// Deadline for each connection phase (TCP, TLS, greeting, LOGIN)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for short commands (SELECT, SEARCH, STORE, LIST)
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// One message as it came off the wire
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// IMAP UID within the fetched mailbox
    pub uid: u32,
    /// Full RFC 822 source
    pub raw: Vec<u8>,
    /// Flags in `Debug` string form (e.g. `Seen`, `Flagged`)
    pub flags: Vec<String>,
}

impl FetchedMessage {
    /// Whether a named flag is present
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f.contains(name))
    }
}

/// Process-local per-mailbox locks
///
/// Two tasks of the same process never run overlapping operations on the
/// same mailbox path.
static MAILBOX_LOCKS: LazyLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Acquire the lock for a mailbox path
async fn lock_mailbox(mailbox: &str) -> OwnedMutexGuard<()> {
    let lock = {
        let mut registry = MAILBOX_LOCKS.lock().expect("mailbox lock registry poisoned");
        Arc::clone(registry.entry(mailbox.to_owned()).or_default())
    };
    lock.lock_owned().await
}

/// Authenticated IMAP client for one account
///
/// `connect` is idempotent and `disconnect` tolerates an already-closed
/// session, so callers can bracket any sequence of operations without
/// tracking connection state themselves.
pub struct ImapClient {
    creds: Credentials,
    session: Option<ImapSession>,
    all_mail: Option<String>,
}

impl ImapClient {
    /// Create a client from account credentials; does not connect
    pub fn new(creds: Credentials) -> Self {
        Self {
            creds,
            session: None,
            all_mail: None,
        }
    }

    /// Connect and authenticate, if not already connected
    ///
    /// Performs the full sequence with per-phase timeouts: TCP connect,
    /// TLS handshake against the system trust roots, IMAP greeting,
    /// LOGIN.
    ///
    /// # Errors
    ///
    /// - `Timeout` if any phase exceeds its deadline
    /// - `Network` for TCP or TLS failures
    /// - `Protocol` if the server closes before greeting
    /// - `AuthFailed` if LOGIN is rejected
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let host = self.creds.imap_host.clone();
        let port = self.creds.imap_port;
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| Error::Timeout("tcp connect timeout".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Network(format!("tcp connect failed: {e}"))))?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| Error::invalid("invalid IMAP host for TLS SNI"))?;
        let tls_stream = timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| Error::Timeout("TLS handshake timeout".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Network(format!("TLS handshake failed: {e}"))))?;

        let mut client = Client::new(tls_stream);
        let greeting = timeout(CONNECT_TIMEOUT, client.read_response())
            .await
            .map_err(|_| Error::Timeout("IMAP greeting timeout".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Protocol(format!("IMAP greeting failed: {e}"))))?;
        if greeting.is_none() {
            return Err(Error::Protocol(
                "IMAP server closed connection before greeting".to_owned(),
            ));
        }

        let pass = self.creds.pass.expose_secret();
        let session = timeout(
            CONNECT_TIMEOUT,
            client.login(self.creds.user.as_str(), pass),
        )
        .await
        .map_err(|_| Error::Timeout("IMAP login timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                    Error::AuthFailed(msg)
                } else {
                    Error::Protocol(msg)
                }
            })
        })?;

        debug!(host = %self.creds.imap_host, user = %self.creds.user, "imap connected");
        self.session = Some(session);
        Ok(())
    }

    /// Log out and drop the session
    ///
    /// Tolerant of an already-closed connection; logout failures are
    /// ignored, the socket is dropped regardless.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = timeout(COMMAND_TIMEOUT, session.logout()).await;
        }
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Protocol("imap client is not connected".to_owned()))
    }

    /// List all visible mailbox paths
    pub async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        let session = self.session()?;
        let stream = timeout(COMMAND_TIMEOUT, session.list(None, Some("*")))
            .await
            .map_err(|_| Error::Timeout("LIST timed out".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Protocol(format!("LIST failed: {e}"))))?;
        let names: Vec<async_imap::types::Name> =
            timeout(COMMAND_TIMEOUT, stream.try_collect())
                .await
                .map_err(|_| Error::Timeout("LIST stream timed out".to_owned()))
                .and_then(|r| r.map_err(|e| Error::Protocol(format!("LIST stream failed: {e}"))))?;
        Ok(names.iter().map(|n| n.name().to_owned()).collect())
    }

    /// Resolve the all-mail mailbox name
    ///
    /// Tries the configured Gmail label first; when the server does not
    /// know it (locale variants), scans LIST output for the `\All`
    /// special-use attribute. The result is cached for the client's
    /// lifetime.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither the label nor a `\All` mailbox exists.
    pub async fn resolve_all_mail(&mut self) -> Result<String> {
        if let Some(name) = &self.all_mail {
            return Ok(name.clone());
        }

        let configured_works = {
            let session = self.session()?;
            timeout(COMMAND_TIMEOUT, session.examine(ALL_MAIL))
                .await
                .is_ok_and(|r| r.is_ok())
        };
        if configured_works {
            self.all_mail = Some(ALL_MAIL.to_owned());
            return Ok(ALL_MAIL.to_owned());
        }

        let names: Vec<async_imap::types::Name> = {
            let session = self.session()?;
            let stream = timeout(COMMAND_TIMEOUT, session.list(None, Some("*")))
                .await
                .map_err(|_| Error::Timeout("LIST timed out".to_owned()))
                .and_then(|r| r.map_err(|e| Error::Protocol(format!("LIST failed: {e}"))))?;
            timeout(COMMAND_TIMEOUT, stream.try_collect())
                .await
                .map_err(|_| Error::Timeout("LIST stream timed out".to_owned()))
                .and_then(|r| r.map_err(|e| Error::Protocol(format!("LIST stream failed: {e}"))))?
        };

        let all = names
            .iter()
            .find(|n| {
                n.attributes()
                    .iter()
                    .any(|attr| format!("{attr:?}").contains("All"))
            })
            .map(|n| n.name().to_owned())
            .ok_or_else(|| {
                Error::NotFound("no all-mail mailbox: neither the Gmail label nor \\All".to_owned())
            })?;
        self.all_mail = Some(all.clone());
        Ok(all)
    }

    /// Fetch messages from the last `days` days of the archive
    ///
    /// Searches `SINCE <date>` on all mail, keeps the newest `max` UIDs
    /// when capped, and fetches source plus flags for each.
    pub async fn fetch_recent(
        &mut self,
        days: u32,
        max: Option<usize>,
    ) -> Result<Vec<FetchedMessage>> {
        let mailbox = self.resolve_all_mail().await?;
        self.fetch_window(&mailbox, days, max).await
    }

    /// Fetch messages from the last `days` days of the inbox
    pub async fn fetch_inbox(
        &mut self,
        days: u32,
        max: Option<usize>,
    ) -> Result<Vec<FetchedMessage>> {
        self.fetch_window(INBOX, days, max).await
    }

    async fn fetch_window(
        &mut self,
        mailbox: &str,
        days: u32,
        max: Option<usize>,
    ) -> Result<Vec<FetchedMessage>> {
        let _guard = lock_mailbox(mailbox).await;
        self.select(mailbox).await?;

        let since = (Utc::now() - ChronoDuration::days(i64::from(days))).format("%d-%b-%Y");
        let mut uids = self.uid_search(&format!("SINCE {since}")).await?;
        uids.sort_unstable();
        if let Some(cap) = max
            && uids.len() > cap
        {
            uids = uids.split_off(uids.len() - cap);
        }
        self.fetch_uids(&uids).await
    }

    /// Fetch everything above the incremental high-water mark
    ///
    /// Runs `UID FETCH (last+1):*` on all mail, then filters client-side
    /// for `uid > last_uid` — servers return the highest existing message
    /// for an out-of-range start, and that message is already on disk.
    pub async fn fetch_since(&mut self, last_uid: u64) -> Result<Vec<FetchedMessage>> {
        let mailbox = self.resolve_all_mail().await?;
        let _guard = lock_mailbox(&mailbox).await;
        self.select(&mailbox).await?;

        let range = format!("{}:*", last_uid + 1);
        let messages = self.fetch_set(&range).await?;
        Ok(messages
            .into_iter()
            .filter(|m| u64::from(m.uid) > last_uid)
            .collect())
    }

    /// Fetch every unseen message in the inbox
    ///
    /// `UID SEARCH UNSEEN`, with no date or count bound.
    pub async fn fetch_unread(&mut self) -> Result<Vec<FetchedMessage>> {
        let _guard = lock_mailbox(INBOX).await;
        self.select(INBOX).await?;
        let mut uids = self.uid_search("UNSEEN").await?;
        uids.sort_unstable();
        self.fetch_uids(&uids).await
    }

    /// Mark inbox messages as seen
    ///
    /// Sets `\Seen` via `+FLAGS.SILENT`; a no-op for an empty UID list.
    pub async fn mark_seen(&mut self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let _guard = lock_mailbox(INBOX).await;
        self.select(INBOX).await?;

        let set = join_uids(uids);
        let session = self.session()?;
        let stream = timeout(
            COMMAND_TIMEOUT,
            session.uid_store(&set, "+FLAGS.SILENT (\\Seen)"),
        )
        .await
        .map_err(|_| Error::Timeout("UID STORE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| Error::Protocol(format!("uid store failed: {e}"))))?;
        let _: Vec<Fetch> = timeout(COMMAND_TIMEOUT, stream.try_collect())
            .await
            .map_err(|_| Error::Timeout("UID STORE stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Protocol(format!("uid store stream failed: {e}"))))?;
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> Result<()> {
        let session = self.session()?;
        timeout(COMMAND_TIMEOUT, session.select(mailbox))
            .await
            .map_err(|_| Error::Timeout(format!("SELECT timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| Error::NotFound(format!("cannot select mailbox '{mailbox}': {e}")))
            })?;
        Ok(())
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>> {
        let session = self.session()?;
        let set = timeout(COMMAND_TIMEOUT, session.uid_search(query))
            .await
            .map_err(|_| Error::Timeout("UID SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| Error::Protocol(format!("uid search failed: {e}"))))?;
        Ok(set.into_iter().collect())
    }

    /// Fetch a list of UIDs as full messages
    async fn fetch_uids(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_set(&join_uids(uids)).await
    }

    /// Run a UID FETCH for source, flags, and UID over a set expression
    ///
    /// The stream is collected without a deadline: message bodies can be
    /// arbitrarily large and the connect phase already vetted liveness.
    async fn fetch_set(&mut self, set: &str) -> Result<Vec<FetchedMessage>> {
        let session = self.session()?;
        let stream = timeout(
            COMMAND_TIMEOUT,
            session.uid_fetch(set, "(UID FLAGS RFC822)"),
        )
        .await
        .map_err(|_| Error::Timeout("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| Error::Protocol(format!("uid fetch failed: {e}"))))?;

        let fetches: Vec<Fetch> = stream
            .try_collect()
            .await
            .map_err(|e| Error::Protocol(format!("uid fetch stream failed: {e}")))?;

        let mut messages = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let Some(body) = fetch.body() else {
                continue;
            };
            messages.push(FetchedMessage {
                uid,
                raw: body.to_vec(),
                flags: flags_to_strings(fetch),
            });
        }
        Ok(messages)
    }
}

/// Convert fetch flags to string representation
///
/// Helper to serialize flag types to `Debug` string format.
fn flags_to_strings(fetch: &Fetch) -> Vec<String> {
    fetch.flags().map(|flag| format!("{flag:?}")).collect()
}

/// Join UIDs into an IMAP set expression
fn join_uids(uids: &[u32]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::{FetchedMessage, join_uids};

    #[test]
    fn uid_sets_are_comma_joined() {
        assert_eq!(join_uids(&[1, 2, 40]), "1,2,40");
        assert_eq!(join_uids(&[7]), "7");
    }

    #[test]
    fn flag_lookup_matches_debug_names() {
        let msg = FetchedMessage {
            uid: 1,
            raw: Vec::new(),
            flags: vec!["Seen".to_owned(), "Flagged".to_owned()],
        };
        assert!(msg.has_flag("Seen"));
        assert!(msg.has_flag("Flagged"));
        assert!(!msg.has_flag("Draft"));
    }
}
