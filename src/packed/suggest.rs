//! Title suggestions backed by the title FST.

use std::collections::HashSet;
use std::sync::Arc;

use fst::automaton::{Automaton, Str};
use fst::{IntoStreamer, Streamer};
use rapidfuzz::fuzz;
use tracing::trace;

use super::format::EntryId;
use super::reader::Shared;
use super::text;
use crate::engine::{
    EngineError, EngineResult, HitCursor, NativeSearch, NativeSuggestionSearcher, RawHit,
};

pub(crate) struct TitleSuggester {
    shared: Arc<Shared>,
}

impl TitleSuggester {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl NativeSuggestionSearcher for TitleSuggester {
    fn suggest(&self, query: &str) -> EngineResult<Box<dyn NativeSearch>> {
        if query.contains('\0') {
            return Err(EngineError::Query("NUL in query".into()));
        }
        let normalized = text::normalize_title(query);
        let words: Vec<String> = normalized
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        let hits = if words.is_empty() {
            Vec::new()
        } else {
            rank(&self.shared, &normalized, &words)
        };
        trace!(query, hits = hits.len(), "ranked suggestions");
        Ok(Box::new(TitleSuggestions {
            shared: Arc::clone(&self.shared),
            words,
            hits,
        }))
    }
}

/// Titles starting with the query come first, then titles in which every
/// query word starts some title word. Within each group, closer titles win.
fn rank(shared: &Shared, normalized: &str, words: &[String]) -> Vec<EntryId> {
    let titles = shared.titles();

    let mut prefixed = Vec::new();
    let mut stream = titles.search(Str::new(normalized).starts_with()).into_stream();
    while let Some((key, id)) = stream.next() {
        prefixed.push((title_of_key(key), id as EntryId));
    }
    let seen: HashSet<EntryId> = prefixed.iter().map(|(_, id)| *id).collect();

    let mut worded = Vec::new();
    let mut stream = titles.stream();
    while let Some((key, id)) = stream.next() {
        let id = id as EntryId;
        if seen.contains(&id) {
            continue;
        }
        let title = title_of_key(key);
        let every_word_hits = words
            .iter()
            .all(|word| title.split(' ').any(|candidate| candidate.starts_with(word.as_str())));
        if every_word_hits {
            worded.push((title, id));
        }
    }

    let mut ranked = Vec::with_capacity(prefixed.len() + worded.len());
    for mut group in [prefixed, worded] {
        let mut scored: Vec<(f64, EntryId)> = group
            .drain(..)
            .map(|(title, id)| (fuzz::ratio(normalized.chars(), title.chars()), id))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.extend(scored.into_iter().map(|(_, id)| id));
    }
    ranked
}

/// Strips the NUL and id suffix from a title key.
fn title_of_key(key: &[u8]) -> String {
    let title = key.split(|b| *b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(title).into_owned()
}

struct TitleSuggestions {
    shared: Arc<Shared>,
    words: Vec<String>,
    hits: Vec<EntryId>,
}

impl TitleSuggestions {
    fn hit(&self, id: EntryId) -> EngineResult<RawHit> {
        let title = self.shared.title_of(id)?;
        Ok(RawHit {
            path: self.shared.path_of(id)?,
            snippet: text::emphasize_prefixes(&title, &self.words),
            title,
            score: None,
            word_count: None,
        })
    }
}

impl NativeSearch for TitleSuggestions {
    fn estimated_matches(&self) -> u64 {
        self.hits.len() as u64
    }

    fn results(&self, offset: usize, limit: usize) -> EngineResult<HitCursor<'_>> {
        Ok(Box::new(
            self.hits
                .iter()
                .skip(offset)
                .take(limit)
                .map(move |&id| self.hit(id)),
        ))
    }
}
