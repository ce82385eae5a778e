use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::engine::{EngineError, HitCursor, NativeSearch, NativeSearcher, RawHit};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::Archive;

/// Search text, validated once and then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.contains('\0') {
            return Err(Error::Query("query contains a NUL character".into()));
        }
        Ok(Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One ranked full-text hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: i32,
    pub word_count: u32,
}

impl From<RawHit> for SearchResult {
    fn from(hit: RawHit) -> Self {
        Self {
            path: hit.path,
            title: hit.title,
            snippet: hit.snippet,
            score: hit.score.unwrap_or_default(),
            word_count: hit.word_count.unwrap_or_default(),
        }
    }
}

/// Cooperative cancellation flag shared between a request and the blocking
/// task doing its engine work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns a guard that trips the token when dropped, unless disarmed.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            token: Some(self.clone()),
        }
    }
}

#[derive(Debug)]
pub struct CancelOnDrop {
    token: Option<CancelToken>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Full-text searcher bound to one archive.
pub struct Searcher {
    native: Handle<dyn NativeSearcher>,
}

impl Searcher {
    pub fn new(archive: &Archive) -> Result<Self> {
        let native = archive.with_native(|archive| archive.searcher().map_err(Error::Search))?;
        Ok(Self {
            native: Handle::new("searcher", native),
        })
    }

    pub fn search(&self, query: &Query) -> Result<Search> {
        let native = self.native.get()?;
        let session = native.search(query.text()).map_err(|err| match err {
            EngineError::Query(detail) => Error::Query(detail),
            other => Error::Search(other),
        })?;
        debug!(query = query.text(), estimated = session.estimated_matches(), "search started");
        Ok(Search {
            native: Handle::new("search", session),
        })
    }
}

/// A live full-text search session. Results can be pulled once.
pub struct Search {
    native: Handle<dyn NativeSearch>,
}

impl Search {
    pub fn estimated_matches(&self) -> Result<u64> {
        Ok(self.native.get()?.estimated_matches())
    }

    /// Materializes the ranked window `[offset, offset + limit)`.
    pub fn results(self, offset: usize, limit: usize) -> Result<Vec<SearchResult>> {
        self.results_inner(offset, limit, None)
    }

    /// Like [`Search::results`], checking `token` before every hit.
    pub fn results_cancellable(
        self,
        offset: usize,
        limit: usize,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        self.results_inner(offset, limit, Some(token))
    }

    fn results_inner(
        self,
        offset: usize,
        limit: usize,
        token: Option<&CancelToken>,
    ) -> Result<Vec<SearchResult>> {
        let native = self.native.get()?;
        let cursor = native.results(offset, limit).map_err(Error::Retrieval)?;
        drain(cursor, limit, token).map(|hits| hits.into_iter().map(SearchResult::from).collect())
    }
}

/// Pulls a cursor to completion. The engine bounds the window, `limit` is
/// re-applied so a misbehaving cursor cannot overrun it.
pub(crate) fn drain(
    cursor: HitCursor<'_>,
    limit: usize,
    token: Option<&CancelToken>,
) -> Result<Vec<RawHit>> {
    let mut hits = Vec::with_capacity(limit.min(64));
    for hit in cursor.take(limit) {
        if token.is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        hits.push(hit.map_err(Error::Retrieval)?);
    }
    Ok(hits)
}
