//! Quote-chain removal
//!
//! Strips the reply history from a message body: "On <date>, <name>
//! wrote:" attributions and everything after them, `-----Original
//! Message-----` tails, and contiguous `>`-prefixed lines. A conservative
//! fallback keeps the original body when stripping leaves almost nothing
//! of a body that had substance.

use std::sync::LazyLock;

use regex::Regex;

/// Attribution line starting a quoted reply; clients wrap it across at
/// most two lines, so the match is bounded rather than line-anchored
static ON_WROTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^On\b[\s\S]{0,200}?wrote:[ \t]*$").unwrap());
static ORIGINAL_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^-{2,}\s*Original Message\s*-{2,}[ \t]*$").unwrap());
static QUOTED_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ \t]*>").unwrap());

/// Minimum surviving characters before the fallback triggers
const MIN_RESULT_CHARS: usize = 10;
/// Inputs shorter than this are never candidates for the fallback
const MIN_INPUT_CHARS: usize = 50;

/// Remove the quoted reply chain from a body
///
/// Falls back to the unmodified input when removal leaves fewer than 10
/// characters of an input that had at least 50.
pub fn strip_quotes(body: &str) -> String {
    let mut text = body.to_owned();

    if let Some(m) = ON_WROTE.find(&text) {
        text.truncate(m.start());
    }
    if let Some(m) = ORIGINAL_MESSAGE.find(&text) {
        text.truncate(m.start());
    }

    let text: String = text
        .lines()
        .filter(|line| !QUOTED_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");

    let trimmed_input = body.trim();
    let trimmed_result = text.trim();
    if trimmed_input.chars().count() >= MIN_INPUT_CHARS
        && trimmed_result.chars().count() < MIN_RESULT_CHARS
    {
        return body.to_owned();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::strip_quotes;

    #[test]
    fn attribution_line_and_tail_are_cut() {
        let body = "Sounds good to me.\n\nOn Mon, Feb 17, 2026 at 9:30 AM You <you@gmail.com> wrote:\n> earlier text\n> more earlier text\n";
        let cleaned = strip_quotes(body);
        assert!(cleaned.contains("Sounds good to me."));
        assert!(!cleaned.contains("wrote:"));
        assert!(!cleaned.contains("earlier text"));
    }

    #[test]
    fn wrapped_attribution_across_two_lines_is_cut() {
        let body = "Reply text here, long enough to stand on its own two feet.\n\nOn Mon, Feb 17, 2026 at 9:30 AM Some Very Long Name\n<long@example.com> wrote:\n> quoted\n";
        let cleaned = strip_quotes(body);
        assert!(cleaned.contains("Reply text here"));
        assert!(!cleaned.contains("quoted"));
    }

    #[test]
    fn original_message_divider_is_cut() {
        let body = "New content above the divider.\n\n-----Original Message-----\nFrom: someone\nthe old thing\n";
        let cleaned = strip_quotes(body);
        assert!(cleaned.contains("New content"));
        assert!(!cleaned.contains("old thing"));
    }

    #[test]
    fn quoted_lines_are_dropped_individually() {
        let body = "top\n> one\n> two\nmiddle\n> three\nbottom\nand some more words to pad this out";
        let cleaned = strip_quotes(body);
        assert!(cleaned.contains("top"));
        assert!(cleaned.contains("middle"));
        assert!(cleaned.contains("bottom"));
        assert!(!cleaned.contains("one"));
        assert!(!cleaned.contains("three"));
    }

    #[test]
    fn all_quote_body_falls_back_to_original() {
        let body = "> every single line of this message is quoted text\n> so stripping would leave nothing of substance here\n";
        let cleaned = strip_quotes(body);
        assert_eq!(cleaned, body);
    }

    #[test]
    fn short_input_may_strip_to_empty_without_fallback() {
        let body = "> tiny quote";
        let cleaned = strip_quotes(body);
        assert!(cleaned.trim().is_empty());
    }
}
