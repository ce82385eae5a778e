//! Text handling shared by the index builder and the query side: markup
//! stripping, tokenization and snippet windows.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node, Selector};
use unicode_segmentation::UnicodeSegmentation;

/// Words on either side of the first match in a snippet window.
const SNIPPET_BEFORE: usize = 10;
const SNIPPET_WORDS: usize = 30;

const HIDDEN_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "textarea", "select",
];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "caption", "dd", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Lucene's default English stopword set.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

#[inline]
fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Lowercased alphanumeric words, stopwords and single characters dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().filter_map(normalize_word).collect()
}

/// Query-side tokenization: same pipeline, first occurrence of each term kept.
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|term| seen.insert(term.clone()))
        .collect()
}

fn normalize_word(word: &str) -> Option<String> {
    let token: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    (token.chars().count() >= 2 && !is_stopword(&token)).then_some(token)
}

/// Key used for title lookups: lowercase with whitespace runs collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_indexable(mimetype: &str) -> bool {
    let essence = mimetype.split(';').next().unwrap_or_default().trim();
    matches!(essence, "text/html" | "text/plain" | "text/markdown")
}

/// Visible text of a document. HTML is stripped of tags, scripts and styles
/// with entities decoded; other indexable types pass through.
pub fn plain_text(mimetype: &str, data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if mimetype.starts_with("text/html") {
        strip_html(&text)
    } else {
        collapse_whitespace(&text)
    }
}

/// Visible text of an HTML document. Text inside `<head>`, scripts, styles,
/// templates and form fields is skipped; block elements separate words.
pub fn strip_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    collect_text(document.root_element(), &mut out);
    collapse_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Node::Text(text) = child.value() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if HIDDEN_ELEMENTS.contains(&name) {
            continue;
        }
        if BLOCK_ELEMENTS.contains(&name) {
            out.push(' ');
            collect_text(child, out);
            out.push(' ');
        } else {
            collect_text(child, out);
        }
    }
}

/// Contents of the first `<title>` element, if any.
pub fn html_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title: String = document.select(&selector).next()?.text().collect();
    let title = collapse_whitespace(&title);
    (!title.is_empty()).then_some(title)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A window of about thirty words around the first word matching `terms`,
/// with every matching word wrapped in `<b>`. Falls back to the opening words
/// when nothing in `text` matches.
pub fn snippet(text: &str, terms: &[String]) -> String {
    let words: Vec<(usize, &str)> = text.unicode_word_indices().collect();
    if words.is_empty() {
        return String::new();
    }
    let matches = |word: &str| normalize_word(word).is_some_and(|token| terms.contains(&token));

    let first = words.iter().position(|(_, word)| matches(word)).unwrap_or(0);
    let start = first.saturating_sub(SNIPPET_BEFORE);
    let end = (start + SNIPPET_WORDS).min(words.len());

    let mut out = String::new();
    if start > 0 {
        out.push_str("… ");
    }
    let mut cursor = words[start].0;
    for &(at, word) in &words[start..end] {
        out.push_str(&text[cursor..at]);
        if matches(word) {
            out.push_str("<b>");
            out.push_str(word);
            out.push_str("</b>");
        } else {
            out.push_str(word);
        }
        cursor = at + word.len();
    }
    if end < words.len() {
        out.push_str(" …");
    }
    out
}

/// `title` with every word that starts with one of `prefixes` wrapped in `<b>`.
pub fn emphasize_prefixes(title: &str, prefixes: &[String]) -> String {
    let mut out = String::with_capacity(title.len() + 8);
    let mut cursor = 0;
    for (at, word) in title.unicode_word_indices() {
        out.push_str(&title[cursor..at]);
        let lower = word.to_lowercase();
        if prefixes.iter().any(|prefix| lower.starts_with(prefix.as_str())) {
            out.push_str("<b>");
            out.push_str(word);
            out.push_str("</b>");
        } else {
            out.push_str(word);
        }
        cursor = at + word.len();
    }
    out.push_str(&title[cursor..]);
    out
}
