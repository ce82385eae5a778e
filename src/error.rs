use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open archive {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("failed to resolve {path:?}: {source}")]
    Resolution {
        path: String,
        #[source]
        source: EngineError,
    },
    #[error("invalid query: {0}")]
    Query(String),
    #[error("search failed: {0}")]
    Search(#[source] EngineError),
    #[error("suggestion search failed: {0}")]
    Suggest(#[source] EngineError),
    #[error("failed to retrieve results: {0}")]
    Retrieval(#[source] EngineError),
    #[error("{0} handle is closed")]
    Closed(&'static str),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    pub(crate) fn resolution(path: impl Into<String>, source: EngineError) -> Self {
        Error::Resolution {
            path: path.into(),
            source,
        }
    }

    /// True for the categories a server reports as 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
