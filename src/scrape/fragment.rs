//! Recovers the passage a `#:~:text=` directive highlights.
//!
//! Matching runs over the whitespace-collapsed page text with case and
//! curly single-quotes folded on both sides, so formatting differences
//! between the rendered page and the directive do not cause misses.

use percent_encoding::percent_decode_str;
use tracing::debug;

use super::types::FRAGMENT_MARKER;

/// Joins the spans of a multi-fragment directive, in fragment order.
pub const SPAN_SEPARATOR: &str = "\n\n---\n\n";

const CONTINUATION: &str = "&text=";
const PREFIX_JOINER: &str = "-,";

/// Resolve every fragment of `url` against `page_text`.
///
/// Returns `None` (a match error) when the URL has no directive, when any
/// fragment cannot be decoded, or when any fragment is not found. A
/// partially resolved anchor is never returned.
pub fn resolve(url: &str, page_text: &str) -> Option<String> {
    let (_, directive) = url.split_once(FRAGMENT_MARKER)?;

    let page: Vec<char> = collapse_whitespace(page_text).chars().collect();
    let folded: Vec<char> = page.iter().copied().map(fold).collect();

    let mut spans = Vec::new();
    for fragment in directive.split(CONTINUATION) {
        match resolve_fragment(fragment, &page, &folded) {
            Some(span) => spans.push(span),
            None => {
                debug!(fragment, url, "highlight match not found");
                return None;
            }
        }
    }

    Some(spans.join(SPAN_SEPARATOR))
}

fn resolve_fragment(fragment: &str, page: &[char], folded: &[char]) -> Option<String> {
    // A `prefix-,` context is folded into the start text.
    let fragment = fragment.replace(PREFIX_JOINER, "\n");
    // Both components are required; a start-only fragment is unmatched.
    let (start, end) = fragment.split_once(',')?;

    let start = decode(start)?;
    if start.is_empty() {
        return None;
    }
    let start_idx = find(folded, &start, 0)?;
    let after_start = start_idx + start.len();

    let end = decode(end)?;
    let stop = if end.is_empty() {
        after_start
    } else {
        // Strictly after the start match, so overlapping texts
        // never produce an empty or inverted span.
        find(folded, &end, after_start)? + end.len()
    };

    let span: String = page[start_idx..stop].iter().collect();
    Some(span.trim().to_string())
}

/// Percent-decode one component into folded, whitespace-collapsed chars.
fn decode(component: &str) -> Option<Vec<char>> {
    let decoded = percent_decode_str(component).decode_utf8().ok()?;
    let collapsed = collapse_whitespace(&decoded);
    Some(collapsed.chars().map(fold).collect())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' => '\'',
        _ => c.to_lowercase().next().unwrap_or(c),
    }
}

fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
