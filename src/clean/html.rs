//! HTML to text conversion
//!
//! A regex pre-pass enforces the corpus rules — `<style>`/`<script>`
//! blocks and `<img>` tags are dropped, anchors become `[text](url)` —
//! then `html2text` handles entity decoding and block layout. Horizontal
//! whitespace runs are collapsed afterwards; blank-line collapsing is the
//! noise step's job.

use std::sync::LazyLock;

use regex::Regex;

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static TRAILING_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());

/// Wrap column handed to `html2text`; wide enough that prose lines stay
/// whole and the noise step's collapsing remains the only reflow
const RENDER_WIDTH: usize = 5000;

/// Convert an HTML body to corpus text
///
/// Never fails: when `html2text` rejects the input the tag-stripping
/// fallback runs instead.
pub fn html_to_text(html: &str) -> String {
    let prepared = rewrite_anchors(html);
    let rendered = html2text::from_read(prepared.as_bytes(), RENDER_WIDTH)
        .unwrap_or_else(|_| strip_tags(&prepared));
    collapse_horizontal(&rendered)
}

/// Apply the pre-pass: drop style/script/img, rewrite anchors
fn rewrite_anchors(html: &str) -> String {
    let without_style = STYLE_BLOCK.replace_all(html, "");
    let without_script = SCRIPT_BLOCK.replace_all(&without_style, "");
    let without_img = IMG_TAG.replace_all(&without_script, "");

    ANCHOR
        .replace_all(&without_img, |caps: &regex::Captures<'_>| {
            let url = caps.get(1).map_or("", |m| m.as_str());
            let inner = caps.get(2).map_or("", |m| m.as_str());
            let text = ANY_TAG.replace_all(inner, "").trim().to_owned();
            if text.is_empty() || text == url {
                url.to_owned()
            } else {
                format!("[{text}]({url})")
            }
        })
        .into_owned()
}

/// Last-resort conversion: strip tags and decode the common entities
fn strip_tags(html: &str) -> String {
    let stripped = ANY_TAG.replace_all(html, " ");
    stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Collapse runs of spaces/tabs, drop trailing whitespace per line
///
/// Non-breaking spaces count as whitespace here; HTML mail leans on them
/// heavily for layout.
fn collapse_horizontal(text: &str) -> String {
    let unified = text.replace('\u{a0}', " ");
    let collapsed = HORIZONTAL_WS.replace_all(&unified, " ");
    TRAILING_WS.replace_all(&collapsed, "").into_owned()
}
