//! RFC 822 message parsing
//!
//! Decodes raw message source into structured headers, bodies, and
//! attachments using `mailparse`. The parser is deliberately forgiving:
//! a missing subject becomes `(no subject)`, a missing or unparseable
//! date becomes "now", and address headers that fail to parse yield
//! empty lists rather than failing the message.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, ParsedMail};

use crate::errors::{Error, Result};
use crate::models::Address;

/// Subject recorded when the header is absent or blank
pub const NO_SUBJECT: &str = "(no subject)";

/// One decoded attachment part
#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    /// Filename from Content-Disposition or Content-Type, unsanitized
    pub filename: Option<String>,
    /// Declared MIME type, lowercased
    pub content_type: String,
    /// Decoded payload
    pub bytes: Vec<u8>,
    /// Decoded size in bytes
    pub size: usize,
    /// Content-ID for inline references, angle brackets stripped
    pub content_id: Option<String>,
}

/// Structured view of one RFC 822 message
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// RFC 822 `Message-ID`, angle brackets stripped; empty when absent
    pub message_id: String,
    /// `In-Reply-To` header, angle brackets stripped; empty when absent
    pub in_reply_to: String,
    /// `References` entries, whitespace-separated or singleton
    pub references: Vec<String>,
    /// Sender (first address of `From`)
    pub from: Address,
    /// `To` recipients
    pub to: Vec<Address>,
    /// `Cc` recipients
    pub cc: Vec<Address>,
    /// Subject, `(no subject)` when missing
    pub subject: String,
    /// Parsed `Date`, now when missing or unparseable
    pub date: DateTime<Utc>,
    /// First `text/plain` body part
    pub text_body: Option<String>,
    /// First `text/html` body part, raw HTML
    pub html_body: Option<String>,
    /// Attachment parts in document order
    pub attachments: Vec<ParsedAttachment>,
}

/// Parse raw RFC 822 bytes into a [`ParsedEmail`]
///
/// # Errors
///
/// Returns `Parse` only when `mailparse` cannot make sense of the source
/// at all; individual missing or malformed headers degrade to defaults.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| Error::Parse(format!("failed to parse RFC822 message: {e}")))?;

    let headers = header_map(&parsed);
    let mut text_body = None;
    let mut html_body = None;
    let mut attachments = Vec::new();
    walk_parts(&parsed, &mut text_body, &mut html_body, &mut attachments);

    let subject = headers
        .get("subject")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map_or_else(|| NO_SUBJECT.to_owned(), ToOwned::to_owned);

    Ok(ParsedEmail {
        message_id: strip_angle_brackets(headers.get("message-id").map_or("", String::as_str)),
        in_reply_to: strip_angle_brackets(headers.get("in-reply-to").map_or("", String::as_str)),
        references: split_references(headers.get("references").map_or("", String::as_str)),
        from: parse_address_list(headers.get("from").map_or("", String::as_str))
            .into_iter()
            .next()
            .unwrap_or_else(|| Address {
                email: String::new(),
                name: String::new(),
            }),
        to: parse_address_list(headers.get("to").map_or("", String::as_str)),
        cc: parse_address_list(headers.get("cc").map_or("", String::as_str)),
        subject,
        date: parse_date(headers.get("date").map_or("", String::as_str)),
        text_body,
        html_body,
        attachments,
    })
}

/// Parse an RFC 2822 date string, falling back to "now"
///
/// Tries strict RFC 2822 first, then `mailparse`'s lenient parser, which
/// copes with the timezone-comment and two-digit-year variants real mail
/// still carries.
pub fn parse_date(value: &str) -> DateTime<Utc> {
    if value.trim().is_empty() {
        return Utc::now();
    }
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            mailparse::dateparse(value)
                .ok()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
        })
        .unwrap_or_else(Utc::now)
}

/// Split a `References` header into individual message ids
///
/// Entries are whitespace-separated; a singleton header is one entry.
pub fn split_references(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(strip_angle_brackets)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strip a single pair of enclosing angle brackets
fn strip_angle_brackets(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_owned()
}

/// Parse an address header into `(email, name)` pairs
///
/// Groups are flattened to their members. Parse failures yield an empty
/// list; a sync never dies on one mangled `To` header.
fn parse_address_list(value: &str) -> Vec<Address> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    let Ok(parsed) = mailparse::addrparse(value) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for addr in parsed.iter() {
        match addr {
            MailAddr::Single(info) => out.push(Address {
                email: info.addr.to_ascii_lowercase(),
                name: info.display_name.clone().unwrap_or_default(),
            }),
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    out.push(Address {
                        email: info.addr.to_ascii_lowercase(),
                        name: info.display_name.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }
    out
}

/// Walk the MIME part tree collecting bodies and attachments
///
/// A leaf part with an attachment disposition or a filename is an
/// attachment; otherwise the first `text/plain` and first `text/html`
/// leaves become the bodies.
fn walk_parts(
    part: &ParsedMail<'_>,
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
    attachments: &mut Vec<ParsedAttachment>,
) {
    if part.subparts.is_empty() {
        let ctype = part.ctype.mimetype.to_ascii_lowercase();
        let disp = part.get_content_disposition();
        let filename = attachment_filename(part, &disp.params);
        let is_attachment = disp.disposition == DispositionType::Attachment || filename.is_some();

        if is_attachment {
            if let Ok(bytes) = part.get_body_raw() {
                let size = bytes.len();
                attachments.push(ParsedAttachment {
                    filename,
                    content_type: ctype,
                    bytes,
                    size,
                    content_id: part
                        .headers
                        .iter()
                        .find(|h| h.get_key_ref().eq_ignore_ascii_case("Content-ID"))
                        .map(|h| strip_angle_brackets(&h.get_value())),
                });
            }
            return;
        }

        if ctype == "text/plain"
            && text_body.is_none()
            && let Ok(text) = part.get_body()
        {
            *text_body = Some(text);
        }
        if ctype == "text/html"
            && html_body.is_none()
            && let Ok(html) = part.get_body()
        {
            *html_body = Some(html);
        }
        return;
    }

    for sub in &part.subparts {
        walk_parts(sub, text_body, html_body, attachments);
    }
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

/// Collect top-level headers into a case-insensitive first-wins map
fn header_map(parsed: &ParsedMail<'_>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for h in &parsed.headers {
        map.entry(h.get_key().to_ascii_lowercase())
            .or_insert_with(|| h.get_value());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{NO_SUBJECT, parse_date, parse_email, split_references};

    #[test]
    fn parses_simple_plain_text_message() {
        let raw = b"Message-ID: <m1@example.com>\r\nFrom: Ada Lovelace <ada@example.com>\r\nTo: user@example.com\r\nSubject: Hi\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nHello there";
        let parsed = parse_email(raw).expect("parse should succeed");

        assert_eq!(parsed.message_id, "m1@example.com");
        assert_eq!(parsed.subject, "Hi");
        assert_eq!(parsed.from.email, "ada@example.com");
        assert_eq!(parsed.from.name, "Ada Lovelace");
        assert_eq!(parsed.to.len(), 1);
        assert_eq!(parsed.text_body.as_deref(), Some("Hello there"));
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.date.to_rfc2822(), "Wed, 1 Jan 2025 00:00:00 +0000");
    }

    #[test]
    fn missing_subject_becomes_placeholder() {
        let raw = b"From: a@b.com\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\nbody";
        let parsed = parse_email(raw).expect("parse");
        assert_eq!(parsed.subject, NO_SUBJECT);
    }

    #[test]
    fn multipart_alternative_surfaces_both_bodies() {
        let raw = concat!(
            "From: a@b.com\r\n",
            "Subject: both\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "plain body\r\n",
            "--sep\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--sep--\r\n",
        )
        .as_bytes();
        let parsed = parse_email(raw).expect("parse");
        assert_eq!(parsed.text_body.as_deref(), Some("plain body\r\n"));
        assert!(parsed.html_body.as_deref().unwrap().contains("html body"));
    }

    #[test]
    fn attachment_parts_are_collected_not_bodied() {
        let raw = concat!(
            "From: a@b.com\r\n",
            "Subject: with attachment\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"sep\"\r\n",
            "\r\n",
            "--sep\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--sep\r\n",
            "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"report.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERi0xLjQ=\r\n",
            "--sep--\r\n",
        )
        .as_bytes();
        let parsed = parse_email(raw).expect("parse");
        assert_eq!(parsed.text_body.as_deref(), Some("see attached\r\n"));
        assert_eq!(parsed.attachments.len(), 1);
        let att = &parsed.attachments[0];
        assert_eq!(att.filename.as_deref(), Some("report.pdf"));
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.bytes, b"%PDF-1.4");
    }

    #[test]
    fn references_split_on_whitespace() {
        assert_eq!(
            split_references("<a@x> <b@y>\t<c@z>"),
            vec!["a@x", "b@y", "c@z"]
        );
        assert_eq!(split_references("<only@one>"), vec!["only@one"]);
        assert!(split_references("").is_empty());
    }

    #[test]
    fn date_parsing_falls_back_leniently() {
        let strict = parse_date("Mon, 17 Feb 2026 09:30:00 -0500");
        assert_eq!(strict.to_rfc3339(), "2026-02-17T14:30:00+00:00");

        // Unparseable dates become "now" rather than failing the message.
        let now_ish = parse_date("not a date");
        assert!(now_ish.timestamp() > 0);
    }
}
