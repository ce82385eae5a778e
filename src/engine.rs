//! Contract between the access layer and an archive engine.
//!
//! An engine owns the on-disk format, decompression and ranking. Everything it
//! hands out is a boxed native resource: dropping the box releases it. The
//! access layer in the crate root wraps each one in a handle that decides
//! *when* that drop happens.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive: {0}")]
    Format(String),
    #[error("archive has no full-text index")]
    NoFulltextIndex,
    #[error("redirect chain starting at {path:?} does not terminate")]
    RedirectLoop { path: String },
    #[error("malformed query: {0}")]
    Query(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Opens archives. One engine value may open any number of archives.
pub trait Engine: Send + Sync {
    fn open(&self, path: &Path) -> EngineResult<Box<dyn NativeArchive>>;
}

/// An opened archive. Shared read-only across threads.
pub trait NativeArchive: Send + Sync {
    fn entry_count(&self) -> u64;

    /// `Ok(None)` means the path is absent; `Err` is an engine failure.
    fn entry_by_path(&self, path: &str) -> EngineResult<Option<Box<dyn NativeEntry>>>;

    /// Enumeration order is engine-defined but stable for the archive.
    fn entry_by_index(&self, index: u64) -> EngineResult<Option<Box<dyn NativeEntry>>>;

    fn main_entry(&self) -> EngineResult<Option<Box<dyn NativeEntry>>>;

    fn has_fulltext_index(&self) -> bool;

    fn metadata(&self, name: &str) -> Option<String>;

    fn metadata_keys(&self) -> Vec<String>;

    fn searcher(&self) -> EngineResult<Box<dyn NativeSearcher>>;

    fn suggestion_searcher(&self) -> EngineResult<Box<dyn NativeSuggestionSearcher>>;
}

pub trait NativeEntry: Send {
    fn path(&self) -> String;
    fn title(&self) -> String;
    fn is_redirect(&self) -> bool;

    /// With `follow_redirects` unset a redirect entry yields its own marker item.
    fn item(&self, follow_redirects: bool) -> EngineResult<Box<dyn NativeItem>>;
}

pub trait NativeItem: Send {
    fn path(&self) -> String;
    fn title(&self) -> String;
    fn mimetype(&self) -> String;
    fn size(&self) -> u64;
    fn data(&self) -> EngineResult<Vec<u8>>;
}

pub trait NativeSearcher: Send + Sync {
    fn search(&self, query: &str) -> EngineResult<Box<dyn NativeSearch>>;
}

pub trait NativeSuggestionSearcher: Send + Sync {
    fn suggest(&self, query: &str) -> EngineResult<Box<dyn NativeSearch>>;
}

/// A live search session, shared by full-text and suggestion searches.
pub trait NativeSearch: Send {
    fn estimated_matches(&self) -> u64;

    /// Opens a cursor over the ranked window `[offset, offset + limit)`.
    fn results(&self, offset: usize, limit: usize) -> EngineResult<HitCursor<'_>>;
}

/// Lazy, finite, non-restartable sequence of hits. Borrowing the search keeps
/// the cursor from outliving the session that produced it.
pub type HitCursor<'a> = Box<dyn Iterator<Item = EngineResult<RawHit>> + Send + 'a>;

/// One hit as the engine reports it. Suggestion engines leave `score` and
/// `word_count` unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHit {
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: Option<i32>,
    pub word_count: Option<u32>,
}
