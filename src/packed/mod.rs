//! The bundled archive engine: a single file holding a compressed rkyv
//! directory, FST lookups and zstd clusters of item payloads.

mod format;
mod fulltext;
mod reader;
mod suggest;
pub mod text;
mod writer;

use std::num::NonZeroUsize;
use std::path::Path;

use crate::engine::{Engine, EngineResult, NativeArchive};

pub use reader::MAX_REDIRECT_HOPS;
pub use writer::{Compression, Creator, PackStats, WriteError, WriterItem};

pub const DEFAULT_CACHE_CLUSTERS: usize = 64;

/// Opens packed archives. `cache_clusters` bounds the decompressed clusters
/// kept per archive.
#[derive(Debug, Clone, Copy)]
pub struct PackedEngine {
    cache_clusters: NonZeroUsize,
}

impl PackedEngine {
    pub fn with_cache_capacity(cache_clusters: usize) -> Self {
        Self {
            cache_clusters: NonZeroUsize::new(cache_clusters).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_clusters.get()
    }
}

impl Default for PackedEngine {
    fn default() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CLUSTERS)
    }
}

impl Engine for PackedEngine {
    fn open(&self, path: &Path) -> EngineResult<Box<dyn NativeArchive>> {
        Ok(Box::new(reader::PackedArchive::open(path, self.cache_clusters)?))
    }
}
