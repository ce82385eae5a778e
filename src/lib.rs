mod error;
mod handle;
mod search;
mod suggest;
#[cfg(test)]
mod testing;

pub mod engine;
pub mod packed;
pub mod present;
#[cfg(feature = "web")]
pub mod web;

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use engine::{Engine, NativeArchive, NativeEntry, NativeItem};
use handle::Handle;

pub use engine::{EngineError, RawHit};
pub use error::{Error, Result};
pub use packed::{Compression, Creator, PackStats, PackedEngine, WriteError, WriterItem};
pub use search::{CancelOnDrop, CancelToken, Query, Search, SearchResult, Searcher};
pub use suggest::{
    MIN_SUGGESTION_CHARS, SuggestionResult, SuggestionSearch, SuggestionSearcher,
};

/// An opened archive.
///
/// Lookups take a shared lock on the native handle, so one `Archive` can sit
/// behind an `Arc` and serve any number of threads. [`Archive::close`] takes
/// the exclusive side; afterwards every operation fails with
/// [`Error::Closed`]. Entries, items and searchers already handed out keep
/// whatever engine state they reference until they are dropped themselves.
pub struct Archive {
    path: PathBuf,
    native: RwLock<Handle<dyn NativeArchive>>,
}

impl Archive {
    /// Opens an archive with the bundled packed engine.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(&PackedEngine::default(), path)
    }

    pub fn open_with(engine: &dyn Engine, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let native = engine.open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), entries = native.entry_count(), "opened archive");
        Ok(Self {
            path: path.to_path_buf(),
            native: RwLock::new(Handle::new("archive", native)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of addressable entries, fixed for the lifetime of the archive.
    pub fn entry_count(&self) -> Result<u64> {
        self.with_native(|native| Ok(native.entry_count()))
    }

    /// Looks up an entry by its path inside the archive (no leading slash).
    pub fn entry_by_path(&self, path: &str) -> Result<Entry> {
        self.with_native(|native| {
            native
                .entry_by_path(path)
                .map_err(|err| Error::resolution(path, err))?
                .map(Entry::from_native)
                .ok_or_else(|| Error::not_found(format!("entry {path:?}")))
        })
    }

    /// Looks up the `index`-th entry. Valid indexes are `0..entry_count()`.
    pub fn entry_by_index(&self, index: u64) -> Result<Entry> {
        self.with_native(|native| {
            if index >= native.entry_count() {
                return Err(Error::not_found(format!("entry #{index}")));
            }
            native
                .entry_by_index(index)
                .map_err(|err| Error::resolution(format!("#{index}"), err))?
                .map(Entry::from_native)
                .ok_or_else(|| Error::not_found(format!("entry #{index}")))
        })
    }

    /// Returns the archive's landing page entry.
    pub fn main_entry(&self) -> Result<Entry> {
        self.with_native(|native| {
            native
                .main_entry()
                .map_err(|err| Error::resolution("main entry", err))?
                .map(Entry::from_native)
                .ok_or_else(|| Error::not_found("main entry"))
        })
    }

    pub fn has_fulltext_index(&self) -> Result<bool> {
        self.with_native(|native| Ok(native.has_fulltext_index()))
    }

    pub fn metadata(&self, name: &str) -> Result<String> {
        self.with_native(|native| {
            native
                .metadata(name)
                .ok_or_else(|| Error::not_found(format!("metadata {name:?}")))
        })
    }

    pub fn metadata_keys(&self) -> Result<Vec<String>> {
        self.with_native(|native| Ok(native.metadata_keys()))
    }

    /// Releases the native archive. Safe to call more than once.
    pub fn close(&self) {
        let mut guard = self.native.write();
        if !guard.is_released() {
            debug!(path = %self.path.display(), "closing archive");
        }
        guard.release();
    }

    pub fn is_closed(&self) -> bool {
        self.native.read().is_released()
    }

    pub(crate) fn with_native<T>(
        &self,
        f: impl FnOnce(&dyn NativeArchive) -> Result<T>,
    ) -> Result<T> {
        let guard = self.native.read();
        f(guard.get()?)
    }
}

/// A request-scoped slot in the archive, possibly a redirect.
pub struct Entry {
    native: Handle<dyn NativeEntry>,
}

impl Entry {
    fn from_native(native: Box<dyn NativeEntry>) -> Self {
        Self {
            native: Handle::new("entry", native),
        }
    }

    pub fn path(&self) -> Result<String> {
        Ok(self.native.get()?.path())
    }

    pub fn title(&self) -> Result<String> {
        Ok(self.native.get()?.title())
    }

    pub fn is_redirect(&self) -> Result<bool> {
        Ok(self.native.get()?.is_redirect())
    }

    /// Resolves the entry to its payload.
    ///
    /// With `follow_redirects` the engine walks the redirect chain to the
    /// concrete item; a broken or cyclic chain is a [`Error::Resolution`].
    /// Without it, a redirect entry yields its own marker item.
    pub fn resolve(&self, follow_redirects: bool) -> Result<Item> {
        let native = self.native.get()?;
        native
            .item(follow_redirects)
            .map(Item::from_native)
            .map_err(|err| Error::resolution(native.path(), err))
    }

    pub fn close(&mut self) {
        self.native.release();
    }
}

/// The concrete payload an entry resolves to.
pub struct Item {
    native: Handle<dyn NativeItem>,
}

impl Item {
    fn from_native(native: Box<dyn NativeItem>) -> Self {
        Self {
            native: Handle::new("item", native),
        }
    }

    pub fn path(&self) -> Result<String> {
        Ok(self.native.get()?.path())
    }

    pub fn title(&self) -> Result<String> {
        Ok(self.native.get()?.title())
    }

    /// Empty when the archive declares no mimetype for the item.
    pub fn mimetype(&self) -> Result<String> {
        Ok(self.native.get()?.mimetype())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.native.get()?.size())
    }

    /// Reads the full payload. The returned buffer always holds `size()` bytes.
    pub fn data(&self) -> Result<Vec<u8>> {
        let native = self.native.get()?;
        let data = native
            .data()
            .map_err(|err| Error::resolution(native.path(), err))?;
        let declared = native.size();
        if data.len() as u64 != declared {
            return Err(Error::resolution(
                native.path(),
                EngineError::Format(format!(
                    "item declares {declared} bytes but {} were read",
                    data.len()
                )),
            ));
        }
        Ok(data)
    }

    pub fn close(&mut self) {
        self.native.release();
    }
}
