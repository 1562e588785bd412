//! Message body cleaning pipeline
//!
//! Turns a raw email body into low-noise text suitable for grep,
//! embedding, and reading. The steps are deterministic and order-fixed:
//!
//! 1. body selection (`text/plain` preferred, HTML converted otherwise)
//! 2. quote-chain removal
//! 3. signature stripping
//! 4. noise normalization
//! 5. snippet extraction
//!
//! Every destructive rule is a bounded pattern paired with a conservative
//! fallback that keeps the original on evidence of over-stripping. The
//! pipeline optimizes for a readable corpus, not linguistic fidelity.

pub mod html;
pub mod noise;
pub mod quotes;
pub mod signature;
pub mod snippet;

/// Result of running the full pipeline over one message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedBody {
    /// Cleaned text written into the message `.md` file
    pub text: String,
    /// Collapsed preview for the thread index
    pub snippet: String,
}

/// Run the full cleaning pipeline
///
/// Prefers the plain-text part; converts HTML only when no usable plain
/// text exists. Both inputs absent (or blank) yield empty output.
pub fn clean_body(text_body: Option<&str>, html_body: Option<&str>) -> CleanedBody {
    let base = match (text_body, html_body) {
        (Some(t), _) if !t.trim().is_empty() => t.to_owned(),
        (_, Some(h)) => html::html_to_text(h),
        _ => String::new(),
    };

    let unquoted = quotes::strip_quotes(&base);
    let unsigned = signature::strip_signature(&unquoted);
    let text = noise::normalize(&unsigned);
    let snippet = snippet::make_snippet(&text);
    CleanedBody { text, snippet }
}
