use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fst::Map;
use lru::LruCache;
use parking_lot::Mutex;
use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{access, access_unchecked};
use tracing::{debug, trace};
use zstd::stream::decode_all;

use super::format::{
    ArchivedClusterRecord, ArchivedDirectory, ArchivedEntryKind, ArchivedEntryRecord, EntryId,
    FORMAT_VERSION, HEADER_LEN, MAGIC,
};
use super::fulltext::FulltextSearcher;
use super::suggest::TitleSuggester;
use crate::engine::{
    EngineError, EngineResult, NativeArchive, NativeEntry, NativeItem, NativeSearcher,
    NativeSuggestionSearcher,
};

/// Longest redirect chain followed before it is treated as a loop.
pub const MAX_REDIRECT_HOPS: usize = 32;

/// Upper bound on the decompressed directory, guarding against hostile headers.
const MAX_DIRECTORY_LEN: u64 = 1 << 32;

/// State shared by an archive and every entry, item and search it hands out.
pub(crate) struct Shared {
    path: PathBuf,
    bytes: AlignedVec,
    paths: Map<Vec<u8>>,
    titles: Map<Vec<u8>>,
    terms: Option<Map<Vec<u8>>>,
    cluster_base: u64,
    file: Mutex<File>,
    clusters: Mutex<LruCache<u32, Arc<Vec<u8>>>>,
}

impl Shared {
    fn open(path: &Path, cache_clusters: NonZeroUsize) -> EngineResult<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|_| format_error("file is too short"))?;
        if &header[..8] != MAGIC {
            return Err(format_error("bad magic"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[8..]);
        let directory_len = u64::from_le_bytes(len_bytes);
        let cluster_base = HEADER_LEN
            .checked_add(directory_len)
            .filter(|end| *end <= file_len)
            .ok_or_else(|| format_error("directory extends past end of file"))?;

        let mut compressed = Vec::new();
        (&mut file).take(directory_len).read_to_end(&mut compressed)?;
        let decompressed = decode_all(compressed.as_slice())
            .map_err(|err| format_error(format!("directory does not decompress: {err}")))?;
        if decompressed.len() as u64 > MAX_DIRECTORY_LEN {
            return Err(format_error("directory is too large"));
        }
        let mut bytes = AlignedVec::with_capacity(decompressed.len());
        bytes.extend_from_slice(&decompressed);

        let directory = access::<ArchivedDirectory, RkyvError>(bytes.as_slice())
            .map_err(|err| format_error(format!("directory failed validation: {err}")))?;
        validate(directory, file_len - cluster_base)?;

        let paths = load_fst(directory.path_fst.as_slice())?;
        let titles = load_fst(directory.title_fst.as_slice())?;
        let terms = directory
            .fulltext
            .as_ref()
            .map(|index| load_fst(index.term_fst.as_slice()))
            .transpose()?;

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            paths,
            titles,
            terms,
            cluster_base,
            file: Mutex::new(file),
            clusters: Mutex::new(LruCache::new(cache_clusters)),
        })
    }

    pub(super) fn directory(&self) -> &ArchivedDirectory {
        // SAFETY: `bytes` passed checked access in `Shared::open` and is never
        // mutated afterwards.
        unsafe { access_unchecked::<ArchivedDirectory>(self.bytes.as_slice()) }
    }

    pub(super) fn entry(&self, id: EntryId) -> EngineResult<&ArchivedEntryRecord> {
        self.directory()
            .entries
            .get(id as usize)
            .ok_or_else(|| format_error(format!("entry id {id} out of range")))
    }

    pub(super) fn entry_count(&self) -> u64 {
        self.directory().entries.len() as u64
    }

    pub(super) fn titles(&self) -> &Map<Vec<u8>> {
        &self.titles
    }

    pub(super) fn terms(&self) -> Option<&Map<Vec<u8>>> {
        self.terms.as_ref()
    }

    pub(super) fn path_of(&self, id: EntryId) -> EngineResult<String> {
        Ok(self.entry(id)?.path.as_str().to_string())
    }

    /// Title with the path standing in for a missing one.
    pub(super) fn title_of(&self, id: EntryId) -> EngineResult<String> {
        let entry = self.entry(id)?;
        let title = entry.title.as_str();
        Ok(if title.is_empty() {
            entry.path.as_str().to_string()
        } else {
            title.to_string()
        })
    }

    pub(super) fn mimetype_of(&self, id: EntryId) -> EngineResult<String> {
        match &self.entry(id)?.kind {
            ArchivedEntryKind::Content { mimetype, .. } => Ok(self
                .directory()
                .mimetypes
                .get(mimetype.to_native() as usize)
                .map(|name| name.as_str().to_string())
                .unwrap_or_default()),
            ArchivedEntryKind::Redirect { .. } => Ok(String::new()),
        }
    }

    fn resolve(&self, start: EntryId) -> EngineResult<EntryId> {
        let mut id = start;
        for _ in 0..=MAX_REDIRECT_HOPS {
            match &self.entry(id)?.kind {
                ArchivedEntryKind::Content { .. } => return Ok(id),
                ArchivedEntryKind::Redirect { target } => id = target.to_native(),
            }
        }
        Err(EngineError::RedirectLoop {
            path: self.path_of(start)?,
        })
    }

    /// Payload of a content entry; empty for a redirect marker.
    pub(super) fn content(&self, id: EntryId) -> EngineResult<Vec<u8>> {
        let ArchivedEntryKind::Content {
            cluster,
            offset,
            len,
            ..
        } = &self.entry(id)?.kind
        else {
            return Ok(Vec::new());
        };
        if len.to_native() == 0 {
            return Ok(Vec::new());
        }
        let cluster = self.cluster(cluster.to_native())?;
        let start = offset.to_native() as usize;
        let end = start + len.to_native() as usize;
        cluster
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| format_error(format!("entry id {id} overruns its cluster")))
    }

    fn cluster(&self, id: u32) -> EngineResult<Arc<Vec<u8>>> {
        if let Some(hit) = self.clusters.lock().get(&id) {
            return Ok(Arc::clone(hit));
        }
        let record = self
            .directory()
            .clusters
            .get(id as usize)
            .ok_or_else(|| format_error(format!("cluster {id} out of range")))?;
        let raw = self.read_cluster(id, record)?;
        let raw = Arc::new(raw);
        self.clusters.lock().put(id, Arc::clone(&raw));
        Ok(raw)
    }

    fn read_cluster(&self, id: u32, record: &ArchivedClusterRecord) -> EngineResult<Vec<u8>> {
        let mut stored = vec![0u8; record.len.to_native() as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.cluster_base + record.offset.to_native()))?;
            file.read_exact(&mut stored)?;
        }
        trace!(archive = %self.path.display(), cluster = id, bytes = stored.len(), "read cluster");
        let raw_len = record.raw_len.to_native() as usize;
        let raw = if record.compressed {
            zstd::bulk::decompress(&stored, raw_len)
                .map_err(|err| format_error(format!("cluster {id} does not decompress: {err}")))?
        } else {
            stored
        };
        if raw.len() != raw_len {
            return Err(format_error(format!(
                "cluster {id} holds {} bytes, expected {raw_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }
}

fn format_error(detail: impl Into<String>) -> EngineError {
    EngineError::Format(detail.into())
}

fn load_fst(bytes: &[u8]) -> EngineResult<Map<Vec<u8>>> {
    Map::new(bytes.to_vec()).map_err(|err| format_error(format!("bad fst: {err}")))
}

/// Cross-checks every id and offset so later reads can index without fear.
fn validate(directory: &ArchivedDirectory, cluster_region: u64) -> EngineResult<()> {
    let version = directory.version.to_native();
    if version != FORMAT_VERSION {
        return Err(format_error(format!("unsupported version {version}")));
    }
    let entry_count = directory.entries.len();
    for cluster in directory.clusters.iter() {
        let end = cluster.offset.to_native().checked_add(cluster.len.to_native());
        if end.is_none_or(|end| end > cluster_region) {
            return Err(format_error("cluster extends past end of file"));
        }
    }
    for (id, entry) in directory.entries.iter().enumerate() {
        let ok = match &entry.kind {
            ArchivedEntryKind::Content {
                mimetype,
                cluster,
                offset,
                len,
            } => {
                let within_cluster = directory
                    .clusters
                    .get(cluster.to_native() as usize)
                    .is_some_and(|record| {
                        u64::from(offset.to_native()) + u64::from(len.to_native())
                            <= record.raw_len.to_native()
                    });
                (len.to_native() == 0 || within_cluster)
                    && (mimetype.to_native() as usize) < directory.mimetypes.len()
            }
            ArchivedEntryKind::Redirect { target } => (target.to_native() as usize) < entry_count,
        };
        if !ok {
            return Err(format_error(format!("entry id {id} is inconsistent")));
        }
    }
    if let Some(main) = directory.main_entry.as_ref() {
        if main.to_native() as usize >= entry_count {
            return Err(format_error("main entry out of range"));
        }
    }
    if let Some(index) = directory.fulltext.as_ref() {
        let docs = index.posting_docs.len();
        let postings_ok = index.posting_freqs.len() == docs
            && index.doc_lengths.len() == entry_count
            && index.postings.iter().all(|range| {
                range.start.to_native() as usize + range.len.to_native() as usize <= docs
            })
            && index
                .posting_docs
                .iter()
                .all(|doc| (doc.to_native() as usize) < entry_count);
        if !postings_ok {
            return Err(format_error("full-text index is inconsistent"));
        }
    }
    Ok(())
}

pub(crate) struct PackedArchive {
    shared: Arc<Shared>,
}

impl PackedArchive {
    pub(crate) fn open(path: &Path, cache_clusters: NonZeroUsize) -> EngineResult<Self> {
        let shared = Shared::open(path, cache_clusters)?;
        debug!(
            path = %path.display(),
            entries = shared.entry_count(),
            fulltext = shared.terms.is_some(),
            "packed archive loaded"
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    fn entry(&self, id: EntryId) -> Box<dyn NativeEntry> {
        Box::new(PackedEntry {
            shared: Arc::clone(&self.shared),
            id,
        })
    }
}

impl NativeArchive for PackedArchive {
    fn entry_count(&self) -> u64 {
        self.shared.entry_count()
    }

    fn entry_by_path(&self, path: &str) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        Ok(self
            .shared
            .paths
            .get(path)
            .map(|id| self.entry(id as EntryId)))
    }

    fn entry_by_index(&self, index: u64) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        if index >= self.entry_count() {
            return Ok(None);
        }
        Ok(Some(self.entry(index as EntryId)))
    }

    fn main_entry(&self) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        Ok(self
            .shared
            .directory()
            .main_entry
            .as_ref()
            .map(|id| self.entry(id.to_native())))
    }

    fn has_fulltext_index(&self) -> bool {
        self.shared.terms.is_some()
    }

    fn metadata(&self, name: &str) -> Option<String> {
        self.shared
            .directory()
            .metadata
            .iter()
            .find(|record| record.name.as_str() == name)
            .map(|record| record.value.as_str().to_string())
    }

    fn metadata_keys(&self) -> Vec<String> {
        self.shared
            .directory()
            .metadata
            .iter()
            .map(|record| record.name.as_str().to_string())
            .collect()
    }

    fn searcher(&self) -> EngineResult<Box<dyn NativeSearcher>> {
        if self.shared.terms.is_none() {
            return Err(EngineError::NoFulltextIndex);
        }
        Ok(Box::new(FulltextSearcher::new(Arc::clone(&self.shared))))
    }

    fn suggestion_searcher(&self) -> EngineResult<Box<dyn NativeSuggestionSearcher>> {
        Ok(Box::new(TitleSuggester::new(Arc::clone(&self.shared))))
    }
}

struct PackedEntry {
    shared: Arc<Shared>,
    id: EntryId,
}

impl NativeEntry for PackedEntry {
    fn path(&self) -> String {
        self.shared.path_of(self.id).unwrap_or_default()
    }

    fn title(&self) -> String {
        self.shared.title_of(self.id).unwrap_or_default()
    }

    fn is_redirect(&self) -> bool {
        self.shared
            .entry(self.id)
            .is_ok_and(|entry| matches!(entry.kind, ArchivedEntryKind::Redirect { .. }))
    }

    fn item(&self, follow_redirects: bool) -> EngineResult<Box<dyn NativeItem>> {
        let id = if follow_redirects {
            self.shared.resolve(self.id)?
        } else {
            self.id
        };
        Ok(Box::new(PackedItem {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }
}

struct PackedItem {
    shared: Arc<Shared>,
    id: EntryId,
}

impl NativeItem for PackedItem {
    fn path(&self) -> String {
        self.shared.path_of(self.id).unwrap_or_default()
    }

    fn title(&self) -> String {
        self.shared.title_of(self.id).unwrap_or_default()
    }

    fn mimetype(&self) -> String {
        self.shared.mimetype_of(self.id).unwrap_or_default()
    }

    fn size(&self) -> u64 {
        match self.shared.entry(self.id).map(|entry| &entry.kind) {
            Ok(ArchivedEntryKind::Content { len, .. }) => u64::from(len.to_native()),
            _ => 0,
        }
    }

    fn data(&self) -> EngineResult<Vec<u8>> {
        self.shared.content(self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::packed::{Compression, Creator, WriterItem};

    fn open(path: &Path) -> PackedArchive {
        PackedArchive::open(path, NonZeroUsize::new(2).unwrap()).unwrap()
    }

    #[test]
    fn payloads_survive_both_compressions() {
        let dir = tempfile::tempdir().unwrap();
        for (name, compression) in [
            ("raw.folio", Compression::None),
            ("zstd.folio", Compression::Zstd),
        ] {
            let out = dir.path().join(name);
            let mut creator = Creator::start(&out).unwrap();
            creator.config_compression(compression).config_cluster_size(16);
            let bodies: Vec<String> = (0..12)
                .map(|n| format!("body number {n} ").repeat(n + 1))
                .collect();
            for (n, body) in bodies.iter().enumerate() {
                creator
                    .add_item(WriterItem::from_bytes(
                        format!("p/{n:02}"),
                        "",
                        "text/plain",
                        body.as_str(),
                    ))
                    .unwrap();
            }
            creator.finish().unwrap();

            let archive = open(&out);
            for (n, body) in bodies.iter().enumerate() {
                let entry = archive.entry_by_path(&format!("p/{n:02}")).unwrap().unwrap();
                let item = entry.item(true).unwrap();
                assert_eq!(item.data().unwrap(), body.as_bytes());
                assert_eq!(item.size(), body.len() as u64);
                assert_eq!(item.title(), format!("p/{n:02}"));
            }
        }
    }

    #[test]
    fn entries_are_enumerated_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("order.folio");
        let mut creator = Creator::start(&out).unwrap();
        for path in ["zeta", "alpha", "mid"] {
            creator
                .add_item(WriterItem::from_bytes(path, path, "text/plain", path))
                .unwrap();
        }
        creator.add_redirect("beta", "Beta", "alpha").unwrap();
        creator.finish().unwrap();

        let archive = open(&out);
        let paths: Vec<String> = (0..archive.entry_count())
            .map(|index| archive.entry_by_index(index).unwrap().unwrap().path())
            .collect();
        assert_eq!(paths, ["alpha", "beta", "mid", "zeta"]);
        assert!(archive.entry_by_index(4).unwrap().is_none());
    }

    #[test]
    fn redirect_cycles_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cycle.folio");
        let mut creator = Creator::start(&out).unwrap();
        creator.add_redirect("a", "A", "b").unwrap();
        creator.add_redirect("b", "B", "a").unwrap();
        creator.finish().unwrap();

        let archive = open(&out);
        let entry = archive.entry_by_path("a").unwrap().unwrap();
        assert!(matches!(
            entry.item(true).err().unwrap(),
            EngineError::RedirectLoop { path } if path == "a"
        ));
        let marker = entry.item(false).unwrap();
        assert_eq!(marker.mimetype(), "");
        assert!(marker.data().unwrap().is_empty());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("whole.folio");
        let mut creator = Creator::start(&out).unwrap();
        creator.config_compression(Compression::None);
        creator
            .add_item(WriterItem::from_bytes("a", "A", "text/plain", vec![b'x'; 4096]))
            .unwrap();
        creator.finish().unwrap();

        let bytes = fs::read(&out).unwrap();
        let cut = dir.path().join("cut.folio");
        fs::write(&cut, &bytes[..bytes.len() - 100]).unwrap();
        assert!(matches!(
            PackedArchive::open(&cut, NonZeroUsize::new(1).unwrap()),
            Err(EngineError::Format(_))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        fs::write(&cut, &bad_magic).unwrap();
        assert!(matches!(
            PackedArchive::open(&cut, NonZeroUsize::new(1).unwrap()),
            Err(EngineError::Format(_))
        ));
    }
}
