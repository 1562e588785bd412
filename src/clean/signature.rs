//! Signature stripping
//!
//! Cuts the trailing signature region: `--` delimiter lines, mobile
//! client taglines, Outlook promos, and shouting legal banners. The
//! fallback keeps the original when the cut would remove more than 80%
//! of a body that had at least 50 characters.

use std::sync::LazyLock;

use regex::Regex;

static MOBILE_TAGLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Sent from (my )?(iPhone|iPad|Android|Galaxy|Samsung|Pixel|BlackBerry|mobile device)")
        .unwrap()
});
static OUTLOOK_PROMO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Get Outlook for ").unwrap());

/// Fraction of the body the cut may remove before the fallback triggers
const MAX_REMOVED_FRACTION: f64 = 0.80;
/// Inputs shorter than this are never candidates for the fallback
const MIN_INPUT_CHARS: usize = 50;
/// Minimum length for a line to count as a legal banner
const LEGAL_BANNER_MIN_CHARS: usize = 40;

/// Remove the signature region from a body
///
/// Scans top-down for the first signature boundary and cuts from there to
/// the end. Falls back to the unmodified input when more than 80% of an
/// input of at least 50 characters would be removed.
pub fn strip_signature(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let Some(cut) = lines.iter().position(|line| is_signature_boundary(line)) else {
        return body.to_owned();
    };

    let result = lines[..cut].join("\n");
    let input_chars = body.trim().chars().count();
    let result_chars = result.trim().chars().count();
    if input_chars >= MIN_INPUT_CHARS {
        let removed = 1.0 - (result_chars as f64 / input_chars as f64);
        if removed > MAX_REMOVED_FRACTION {
            return body.to_owned();
        }
    }
    result
}

/// Whether a line starts the signature region
fn is_signature_boundary(line: &str) -> bool {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line == "--" || line == "-- " || line == "__" {
        return true;
    }
    if MOBILE_TAGLINE.is_match(line) || OUTLOOK_PROMO.is_match(line) {
        return true;
    }
    is_legal_banner(line)
}

/// Long all-caps legal header, e.g. confidentiality disclaimers
///
/// At least 40 characters, a real amount of letters, and not a single
/// lowercase one among them.
fn is_legal_banner(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.chars().count() < LEGAL_BANNER_MIN_CHARS {
        return false;
    }
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 10 && !trimmed.chars().any(|c| c.is_lowercase())
}
