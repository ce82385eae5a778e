//! Turns engine results into records safe to drop into an HTML page.
//!
//! Titles and snippets come out of the archive as loosely marked-up text. Only
//! the emphasis tags in [`EMPHASIS_TAGS`] survive; everything else is escaped.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;

use crate::{SearchResult, SuggestionResult};

/// Tags re-admitted after escaping.
pub const EMPHASIS_TAGS: [&str; 2] = ["b", "i"];

/// Characters escaped in an archive path placed in a URL or an HTML attribute.
/// `/` stays literal so the path keeps its directory structure.
pub const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'\'')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayResult {
    pub path: String,
    pub href: String,
    pub title: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
}

pub fn present_search(results: &[SearchResult]) -> Vec<DisplayResult> {
    results
        .iter()
        .map(|result| DisplayResult {
            path: result.path.clone(),
            href: content_href(&result.path),
            title: sanitize_markup(&result.title),
            snippet: sanitize_markup(&result.snippet),
            score: Some(result.score),
            word_count: Some(result.word_count),
        })
        .collect()
}

pub fn present_suggestions(results: &[SuggestionResult]) -> Vec<DisplayResult> {
    results
        .iter()
        .map(|result| DisplayResult {
            path: result.path.clone(),
            href: content_href(&result.path),
            title: sanitize_markup(&result.title),
            snippet: sanitize_markup(&result.snippet),
            score: None,
            word_count: None,
        })
        .collect()
}

/// `/content/<path>` with the path percent-encoded.
pub fn content_href(path: &str) -> String {
    format!("/content/{}", encode_path(path))
}

pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_SEGMENT).to_string()
}

/// Escapes `text` for HTML, keeping balanced emphasis tags.
///
/// Closers without a matching opener are dropped and openers still open at
/// the end are closed, so the fragment cannot leak emphasis into the page.
pub fn sanitize_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut open: Vec<&'static str> = Vec::new();
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if ch == '<' {
            if let Some((tag, closing, len)) = emphasis_tag(rest) {
                if !closing {
                    open.push(tag);
                    push_tag(&mut out, tag, false);
                } else if let Some(depth) = open.iter().rposition(|t| *t == tag) {
                    for inner in open.drain(depth..).rev() {
                        push_tag(&mut out, inner, true);
                    }
                }
                rest = &rest[len..];
                continue;
            }
        }
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
        rest = &rest[ch.len_utf8()..];
    }

    for tag in open.into_iter().rev() {
        push_tag(&mut out, tag, true);
    }
    out
}

/// Matches `<b>`, `</b>`, `<i>` or `</i>` (ASCII case-insensitive) at the
/// start of `s`, returning the tag, whether it closes, and its byte length.
fn emphasis_tag(s: &str) -> Option<(&'static str, bool, usize)> {
    let bytes = s.as_bytes();
    let (closing, name_at) = match bytes.get(1) {
        Some(b'/') => (true, 2),
        _ => (false, 1),
    };
    let name = bytes.get(name_at)?.to_ascii_lowercase();
    if bytes.get(name_at + 1) != Some(&b'>') {
        return None;
    }
    EMPHASIS_TAGS
        .iter()
        .find(|tag| tag.as_bytes() == [name])
        .map(|tag| (*tag, closing, name_at + 2))
}

fn push_tag(out: &mut String, tag: &str, closing: bool) {
    out.push('<');
    if closing {
        out.push('/');
    }
    out.push_str(tag);
    out.push('>');
}
