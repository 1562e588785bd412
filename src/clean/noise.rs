//! Noise normalization
//!
//! The final destructive pass over a body: Unicode NFC, quote
//! straightening, image-reference removal, URL de-tracking and
//! shortening, footer-region removal, and blank-line collapsing. Rules
//! are bounded patterns; the footer cut carries its own retention guard.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use url::Url;

static LONE_IMAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?:image|cid):[^\]]*\]$").unwrap());
static BARE_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://\S+\.(?:png|jpe?g|gif|webp|svg|bmp|ico)(?:\?\S*)?$").unwrap()
});
static URL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"\)\]]+"#).unwrap());
static FOOTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unsubscribe|view (?:this )?(?:e-?mail )?in (?:your )?browser|you (?:are )?receiv(?:ed|ing) this (?:e-?mail|message)|manage (?:your )?(?:e-?mail )?preferences|update (?:your )?preferences|no longer wish to receive|all rights reserved|privacy policy|^©",
    )
    .unwrap()
});
static FOOTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unsubscribe|all rights reserved|privacy policy|terms of service|this e-?mail was sent to|^©|^\(c\) 20\d\d",
    )
    .unwrap()
});
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// URLs longer than this are shortened to `origin/<first-path>/...`
const MAX_URL_CHARS: usize = 150;
/// Where the footer-marker scan begins, as a fraction of the body
const FOOTER_SCAN_START: f64 = 0.40;
/// Minimum fraction of the body a footer cut must preserve
const FOOTER_MIN_RETAIN: f64 = 0.20;
/// Query parameters recognized as tracking noise
const TRACKING_PARAMS: [&str; 7] = [
    "correlation_id",
    "ref_campaign",
    "ref_source",
    "token",
    "auto_token",
    "ct",
    "ec",
];

/// Run the full noise pass over a body
pub fn normalize(body: &str) -> String {
    let text: String = body.nfc().collect();
    let text = straighten_quotes(&text);
    let text = drop_image_lines(&text);
    let text = rewrite_urls(&text);
    let text = cut_footer_by_marker(&text);
    let text = trim_trailing_footer_lines(&text);
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_owned()
}

/// Replace curly quotation marks with their ASCII forms
fn straighten_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            other => other,
        })
        .collect()
}

/// Drop lines that are nothing but an image reference
fn drop_image_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !LONE_IMAGE_REF.is_match(trimmed) && !BARE_IMAGE_URL.is_match(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// De-track and shorten every URL in the body
fn rewrite_urls(text: &str) -> String {
    URL_TOKEN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            rewrite_one_url(caps.get(0).map_or("", |m| m.as_str()))
        })
        .into_owned()
}

/// Strip tracking parameters, then shorten when still over the bound
fn rewrite_one_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['.', ',', ';', ':', '!', '?']);
    let tail = &raw[trimmed.len()..];

    let Ok(mut parsed) = Url::parse(trimmed) else {
        return raw.to_owned();
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let rebuilt: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&rebuilt));
    }

    let mut rendered = parsed.to_string();
    if rendered.chars().count() > MAX_URL_CHARS {
        let origin = parsed.origin().ascii_serialization();
        rendered = match parsed.path_segments().and_then(|mut s| s.next()) {
            Some(first) if !first.is_empty() => format!("{origin}/{first}/..."),
            _ => format!("{origin}/..."),
        };
    }
    format!("{rendered}{tail}")
}

/// Whether a query key is recognized tracking noise
fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Footer strategy (a): scan from 40% in for a boundary marker and cut
///
/// The cut only happens when it preserves at least 20% of the text.
fn cut_footer_by_marker(text: &str) -> String {
    let total = text.len();
    if total == 0 {
        return String::new();
    }
    let scan_from = (total as f64 * FOOTER_SCAN_START) as usize;

    let mut offset = 0usize;
    for line in text.lines() {
        let line_start = offset;
        offset += line.len() + 1;
        if line_start < scan_from {
            continue;
        }
        if FOOTER_MARKER.is_match(line.trim()) {
            if (line_start as f64 / total as f64) >= FOOTER_MIN_RETAIN {
                return text[..line_start].trim_end().to_owned();
            }
            return text.to_owned();
        }
    }
    text.to_owned()
}

/// Footer strategy (b): walk backward trimming trailing footer lines
fn trim_trailing_footer_lines(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        if trimmed.is_empty() || FOOTER_LINE.is_match(trimmed) {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n")
}
