//! SMTP draft dispatch
//!
//! Renders an outbound [`Draft`] as RFC 822 via `lettre` and submits it
//! over implicit TLS. Drafts without attachments go out as plain
//! `text/plain; charset=utf-8`; drafts with attachments become
//! `multipart/mixed`, each attachment read from its absolute path at
//! dispatch time.
//!
//! The [`MailTransport`] trait is the seam the outbox watcher dispatches
//! through; tests substitute a recording implementation. Failures are
//! surfaced without retry — disposition is the state machine's call, not
//! the transport's.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::Credentials;
use crate::errors::{Error, Result};
use crate::models::Draft;

/// Result of a successful dispatch
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// `Message-ID` the rendered message carried, brackets stripped
    pub provider_message_id: String,
}

/// Anything that can ship a draft to the provider
///
/// Implemented by [`SmtpSender`] for production and by in-memory
/// recorders in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Render and submit one draft on behalf of `from`
    async fn send(&self, from: &str, draft: &Draft) -> Result<SendOutcome>;
}

/// Production SMTP transport
pub struct SmtpSender {
    creds: Credentials,
}

impl SmtpSender {
    /// Create a sender from account credentials
    pub fn new(creds: Credentials) -> Self {
        Self { creds }
    }

    /// Render a draft into a `lettre` message
    async fn render(&self, from: &str, draft: &Draft) -> Result<Message> {
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e| Error::invalid(format!("invalid from address '{from}': {e}")))?;

        let mut builder = Message::builder().from(from_mailbox).subject(&draft.subject);
        for to in &draft.to {
            builder = builder.to(to
                .parse()
                .map_err(|e| Error::invalid(format!("invalid to address '{to}': {e}")))?);
        }
        for cc in &draft.cc {
            builder = builder.cc(cc
                .parse()
                .map_err(|e| Error::invalid(format!("invalid cc address '{cc}': {e}")))?);
        }

        if draft.attachments.is_empty() {
            return builder
                .header(ContentType::TEXT_PLAIN)
                .body(draft.body.clone())
                .map_err(|e| Error::Smtp(format!("message build failed: {e}")));
        }

        let mut multipart = MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(draft.body.clone()),
        );
        for attachment in &draft.attachments {
            let bytes = tokio::fs::read(&attachment.path).await.map_err(|e| {
                Error::invalid(format!(
                    "cannot read attachment '{}': {e}",
                    attachment.path
                ))
            })?;
            let content_type = ContentType::parse(&attachment.mime_type).map_err(|e| {
                Error::invalid(format!(
                    "invalid attachment mime '{}': {e}",
                    attachment.mime_type
                ))
            })?;
            multipart = multipart
                .singlepart(Attachment::new(attachment.filename.clone()).body(bytes, content_type));
        }

        builder
            .multipart(multipart)
            .map_err(|e| Error::Smtp(format!("message build failed: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpSender {
    async fn send(&self, from: &str, draft: &Draft) -> Result<SendOutcome> {
        let message = self.render(from, draft).await?;
        let provider_message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_owned())
            .unwrap_or_default();

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.creds.smtp_host)
            .map_err(|e| Error::Smtp(format!("smtp relay setup failed: {e}")))?
            .port(self.creds.smtp_port)
            .credentials(SmtpCredentials::new(
                self.creds.user.clone(),
                self.creds.pass.expose_secret().to_owned(),
            ))
            .build();

        mailer.send(message).await.map_err(|e| {
            if e.to_string().to_ascii_lowercase().contains("auth") {
                Error::AuthFailed(format!("smtp authentication failed: {e}"))
            } else {
                Error::Smtp(format!("smtp send failed: {e}"))
            }
        })?;

        info!(to = ?draft.to, subject = %draft.subject, "draft dispatched via smtp");
        Ok(SendOutcome {
            provider_message_id,
        })
    }
}
