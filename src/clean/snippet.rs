//! Snippet extraction
//!
//! Produces the one-line preview stored in the thread index: collapsed
//! whitespace, truncated at a word boundary, ellipsis when cut.

/// Maximum snippet length in characters, before the ellipsis
pub const MAX_SNIPPET_CHARS: usize = 300;
/// Earliest acceptable word-boundary cut, as a fraction of the cap
const MIN_BOUNDARY_FRACTION: f64 = 0.70;

/// Build a snippet from cleaned body text
///
/// All whitespace runs collapse to single spaces. Text longer than the
/// cap is cut at the last space no earlier than 70% of the cap; when no
/// such space exists the cut is hard. A truncated snippet ends in `...`.
pub fn make_snippet(text: &str) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    if chars.len() <= MAX_SNIPPET_CHARS {
        return collapsed;
    }

    let min_cut = (MAX_SNIPPET_CHARS as f64 * MIN_BOUNDARY_FRACTION) as usize;
    let window = &chars[..=MAX_SNIPPET_CHARS.min(chars.len() - 1)];
    let cut = window
        .iter()
        .rposition(|c| *c == ' ')
        .filter(|pos| *pos >= min_cut)
        .unwrap_or(MAX_SNIPPET_CHARS);

    let mut out: String = chars[..cut].iter().collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::{MAX_SNIPPET_CHARS, make_snippet};

    #[test]
    fn short_text_passes_through_collapsed() {
        assert_eq!(make_snippet("one\n  two\tthree"), "one two three");
    }

    #[test]
    fn long_text_cuts_at_word_boundary_with_ellipsis() {
        let text = "word ".repeat(100);
        let snippet = make_snippet(&text);
        assert!(snippet.ends_with("..."));
        let body = snippet.trim_end_matches("...");
        assert!(body.chars().count() <= MAX_SNIPPET_CHARS);
        assert!(body.chars().count() >= (MAX_SNIPPET_CHARS * 7) / 10 - 5);
        assert!(body.ends_with("word"), "cut lands on a whole word: {body:?}");
    }

    #[test]
    fn unbroken_text_cuts_hard_at_cap() {
        let text = "x".repeat(400);
        let snippet = make_snippet(&text);
        assert_eq!(snippet.chars().count(), MAX_SNIPPET_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(make_snippet(""), "");
        assert_eq!(make_snippet("   \n\t "), "");
    }
}
