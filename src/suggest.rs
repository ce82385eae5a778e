use serde::Serialize;
use tracing::debug;

use crate::engine::{NativeSearch, NativeSuggestionSearcher, RawHit};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::search::{CancelToken, drain};
use crate::Archive;

/// Queries shorter than this (in characters) never reach the engine.
pub const MIN_SUGGESTION_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestionResult {
    pub path: String,
    pub title: String,
    pub snippet: String,
}

impl From<RawHit> for SuggestionResult {
    fn from(hit: RawHit) -> Self {
        Self {
            path: hit.path,
            title: hit.title,
            snippet: hit.snippet,
        }
    }
}

/// Title-oriented searcher bound to one archive.
pub struct SuggestionSearcher {
    native: Handle<dyn NativeSuggestionSearcher>,
}

impl SuggestionSearcher {
    pub fn new(archive: &Archive) -> Result<Self> {
        let native = archive.with_native(|archive| {
            archive.suggestion_searcher().map_err(Error::Suggest)
        })?;
        Ok(Self {
            native: Handle::new("suggestion searcher", native),
        })
    }

    pub fn suggest(&self, text: &str) -> Result<SuggestionSearch> {
        let session = self.native.get()?.suggest(text).map_err(Error::Suggest)?;
        debug!(text, estimated = session.estimated_matches(), "suggestion search started");
        Ok(SuggestionSearch {
            native: Handle::new("suggestion search", session),
        })
    }

    /// The first `limit` suggestions for `text`, or nothing at all when the
    /// text is too short to be worth asking about.
    pub fn suggest_top(&self, text: &str, limit: usize) -> Result<Vec<SuggestionResult>> {
        if text.chars().count() < MIN_SUGGESTION_CHARS {
            return Ok(Vec::new());
        }
        self.suggest(text)?.results(0, limit)
    }
}

pub struct SuggestionSearch {
    native: Handle<dyn NativeSearch>,
}

impl SuggestionSearch {
    pub fn estimated_matches(&self) -> Result<u64> {
        Ok(self.native.get()?.estimated_matches())
    }

    pub fn results(self, offset: usize, limit: usize) -> Result<Vec<SuggestionResult>> {
        self.results_inner(offset, limit, None)
    }

    pub fn results_cancellable(
        self,
        offset: usize,
        limit: usize,
        token: &CancelToken,
    ) -> Result<Vec<SuggestionResult>> {
        self.results_inner(offset, limit, Some(token))
    }

    fn results_inner(
        self,
        offset: usize,
        limit: usize,
        token: Option<&CancelToken>,
    ) -> Result<Vec<SuggestionResult>> {
        let cursor = self
            .native
            .get()?
            .results(offset, limit)
            .map_err(Error::Retrieval)?;
        drain(cursor, limit, token)
            .map(|hits| hits.into_iter().map(SuggestionResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngine, search_archive};

    #[test]
    fn short_text_never_reaches_engine() {
        let engine = MockEngine::with_pages(&[("a.html", "text/html", "A")]);
        let counters = engine.counters();
        let archive = Archive::open_with(&engine, "mock.folio").unwrap();
        let suggestions = SuggestionSearcher::new(&archive).unwrap();

        assert!(suggestions.suggest_top("", 10).unwrap().is_empty());
        assert!(suggestions.suggest_top("a", 10).unwrap().is_empty());
        assert!(suggestions.suggest_top("é", 10).unwrap().is_empty());
        assert_eq!(counters.suggest_calls(), 0);

        suggestions.suggest_top("ab", 10).unwrap();
        assert_eq!(counters.suggest_calls(), 1);
    }

    #[test]
    fn prefix_matches_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(search_archive(dir.path())).unwrap();
        let suggestions = SuggestionSearcher::new(&archive).unwrap();

        let hits = suggestions.suggest_top("mark", 10).unwrap();
        assert_eq!(hits[0].path, "index");
        assert_eq!(hits[0].title, "Markdown Documentation");
        assert!(hits[0].snippet.contains("<b>"));

        let hits = suggestions.suggest_top("refer", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "guide/links.html");
    }

    #[test]
    fn suggestions_respect_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(search_archive(dir.path())).unwrap();
        let suggestions = SuggestionSearcher::new(&archive).unwrap();
        let search = suggestions.suggest("ta").unwrap();
        assert!(search.estimated_matches().unwrap() >= 1);
        assert!(suggestions.suggest_top("ta", 1).unwrap().len() <= 1);
        assert!(suggestions.suggest_top("zzzz", 10).unwrap().is_empty());
    }
}
