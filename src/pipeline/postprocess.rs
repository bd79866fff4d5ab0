//! Post-processing: presentation cleanup of parsed Markdown.
//!
//! ADE annotates its Markdown with inline anchors of the form `<::...::>`
//! (chunk ids, figure descriptions, page markers), which may span several
//! lines. They are useful to downstream tooling reading the cache but noise
//! to a human reader, so they are removed on every read path.
//!
//! The cache keeps the tagged original; cleaning is never persisted.
//!
//! ## Rule Order
//!
//! Tags are stripped before trimming so that a document ending in a tag has
//! no trailing whitespace left behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to raw parse output.
///
/// Rules (applied in order):
/// 1. Remove every `<::...::>` span, repeating until none remain
/// 2. Trim leading and trailing whitespace
///
/// Idempotent: `clean_markdown(&clean_markdown(s)) == clean_markdown(s)`.
pub fn clean_markdown(input: &str) -> String {
    let s = strip_inline_tags(input);
    s.trim().to_string()
}

// ── Rule 1: Strip inline tags ────────────────────────────────────────────────

static RE_INLINE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<::.*?::>").unwrap());

/// Remove `<::...::>` spans (non-greedy, across newlines).
///
/// A single pass can splice a new span together (`<:<::a::>:b::>` becomes
/// `<::b::>`), so passes repeat until the text is tag-free.
pub fn strip_inline_tags(input: &str) -> String {
    let mut out = input.to_string();
    while RE_INLINE_TAG.is_match(&out) {
        out = RE_INLINE_TAG.replace_all(&out, "").into_owned();
    }
    out
}

/// Whether `input` still contains an inline tag.
pub fn has_inline_tags(input: &str) -> bool {
    RE_INLINE_TAG.is_match(input)
}
