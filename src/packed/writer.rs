use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fst::MapBuilder;
use rayon::prelude::*;
use rkyv::rancor::Error as RkyvError;
use rkyv::to_bytes;
use thiserror::Error;
use tracing::{debug, info};
use zstd::bulk::compress as zstd_compress;

use super::format::{
    ClusterRecord, Directory, EntryId, EntryKind, EntryRecord, FORMAT_VERSION, FulltextIndex,
    MAGIC, MetadataRecord, Range,
};
use super::text;

const DIRECTORY_COMPRESSION_LEVEL: i32 = 19;
const CLUSTER_COMPRESSION_LEVEL: i32 = 9;
const DEFAULT_CLUSTER_SIZE: usize = 1 << 20;
/// Title occurrences count this many times a body occurrence.
const TITLE_WEIGHT: u32 = 4;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("item path must not be empty")]
    EmptyPath,
    #[error("path {0:?} was added twice")]
    DuplicatePath(String),
    #[error("redirect {from:?} points at missing path {target:?}")]
    DanglingRedirect { from: String, target: String },
    #[error("main path {0:?} is not in the archive")]
    MissingMainPath(String),
    #[error("failed to build index: {0}")]
    Fst(#[from] fst::Error),
    #[error("failed to serialize directory: {0}")]
    Serialize(String),
    #[error("archive is too large for the packed format")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Zstd,
}

#[derive(Debug, Clone)]
enum ItemSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// One payload queued for a [`Creator`].
#[derive(Debug, Clone)]
pub struct WriterItem {
    path: String,
    title: String,
    mimetype: String,
    source: ItemSource,
    front_article: bool,
}

impl WriterItem {
    pub fn from_bytes(
        path: impl Into<String>,
        title: impl Into<String>,
        mimetype: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(path, title, mimetype, ItemSource::Bytes(data.into()))
    }

    /// The file is read when the archive is finished, not now.
    pub fn from_file(
        path: impl Into<String>,
        title: impl Into<String>,
        mimetype: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self::new(path, title, mimetype, ItemSource::File(file.into()))
    }

    fn new(
        path: impl Into<String>,
        title: impl Into<String>,
        mimetype: impl Into<String>,
        source: ItemSource,
    ) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            mimetype: mimetype.into(),
            source,
            front_article: false,
        }
    }

    /// Front articles are offered as suggestions and indexed for full-text search.
    pub fn front_article(mut self, front_article: bool) -> Self {
        self.front_article = front_article;
        self
    }
}

#[derive(Debug, Clone)]
struct PendingRedirect {
    path: String,
    title: String,
    target: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub entries: usize,
    pub redirects: usize,
    pub clusters: usize,
    pub indexed: usize,
    pub bytes: u64,
}

/// Builds a packed archive.
///
/// Items, redirects and metadata are queued in memory; [`Creator::finish`]
/// sorts them, packs clusters and writes the file in one pass.
pub struct Creator {
    out: PathBuf,
    file: File,
    compression: Compression,
    verbose: bool,
    indexing: bool,
    cluster_size: usize,
    paths: HashSet<String>,
    items: Vec<WriterItem>,
    redirects: Vec<PendingRedirect>,
    metadata: BTreeMap<String, String>,
    main_path: Option<String>,
}

impl Creator {
    /// Creates (or truncates) the output file.
    pub fn start(out: impl AsRef<Path>) -> Result<Self, WriteError> {
        let out = out.as_ref().to_path_buf();
        let file = File::create(&out)?;
        Ok(Self {
            out,
            file,
            compression: Compression::default(),
            verbose: false,
            indexing: true,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            paths: HashSet::new(),
            items: Vec::new(),
            redirects: Vec::new(),
            metadata: BTreeMap::new(),
            main_path: None,
        })
    }

    pub fn config_compression(&mut self, compression: Compression) -> &mut Self {
        self.compression = compression;
        self
    }

    pub fn config_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    pub fn config_indexing(&mut self, indexing: bool) -> &mut Self {
        self.indexing = indexing;
        self
    }

    /// Target uncompressed size of a cluster. Items never straddle clusters.
    pub fn config_cluster_size(&mut self, bytes: usize) -> &mut Self {
        self.cluster_size = bytes.max(1);
        self
    }

    pub fn add_metadata(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), WriteError> {
        let name = name.into();
        if name.is_empty() {
            return Err(WriteError::EmptyPath);
        }
        self.metadata.insert(name, value.into());
        Ok(())
    }

    pub fn add_item(&mut self, item: WriterItem) -> Result<(), WriteError> {
        self.claim_path(&item.path)?;
        self.items.push(item);
        Ok(())
    }

    pub fn add_redirect(
        &mut self,
        path: impl Into<String>,
        title: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), WriteError> {
        let path = path.into();
        self.claim_path(&path)?;
        self.redirects.push(PendingRedirect {
            path,
            title: title.into(),
            target: target.into(),
        });
        Ok(())
    }

    pub fn set_main_path(&mut self, path: impl Into<String>) {
        self.main_path = Some(path.into());
    }

    fn claim_path(&mut self, path: &str) -> Result<(), WriteError> {
        if path.is_empty() {
            return Err(WriteError::EmptyPath);
        }
        if !self.paths.insert(path.to_string()) {
            return Err(WriteError::DuplicatePath(path.to_string()));
        }
        Ok(())
    }

    pub fn finish(self) -> Result<PackStats, WriteError> {
        let Creator {
            out,
            file,
            compression,
            verbose,
            indexing,
            cluster_size,
            paths: _,
            items,
            redirects,
            metadata,
            main_path,
        } = self;

        if items.len() + redirects.len() > EntryId::MAX as usize {
            return Err(WriteError::TooLarge);
        }

        let loaded = items
            .into_par_iter()
            .map(load_item)
            .collect::<Result<Vec<_>, WriteError>>()?;

        let mut pending: Vec<Pending> = loaded
            .into_iter()
            .map(Pending::Content)
            .chain(redirects.into_iter().map(Pending::Redirect))
            .collect();
        pending.sort_by(|a, b| a.path().cmp(b.path()));

        let ids: HashMap<&str, EntryId> = pending
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.path(), index as EntryId))
            .collect();

        let main_entry = match &main_path {
            Some(path) => Some(
                *ids
                    .get(path.as_str())
                    .ok_or_else(|| WriteError::MissingMainPath(path.clone()))?,
            ),
            None => None,
        };

        let mut mimetypes = MimeTable::default();
        let mut packer = ClusterPacker::new(cluster_size);
        let mut entries = Vec::with_capacity(pending.len());
        let mut redirect_count = 0;
        for entry in &pending {
            let kind = match entry {
                Pending::Content(item) => {
                    let (cluster, offset) = packer.push(&item.data);
                    EntryKind::Content {
                        mimetype: mimetypes.intern(&item.mimetype),
                        cluster,
                        offset,
                        len: u32::try_from(item.data.len()).map_err(|_| WriteError::TooLarge)?,
                    }
                }
                Pending::Redirect(redirect) => {
                    redirect_count += 1;
                    let target = ids.get(redirect.target.as_str()).ok_or_else(|| {
                        WriteError::DanglingRedirect {
                            from: redirect.path.clone(),
                            target: redirect.target.clone(),
                        }
                    })?;
                    EntryKind::Redirect { target: *target }
                }
            };
            entries.push(EntryRecord {
                path: entry.path().to_string(),
                title: entry.title().to_string(),
                kind,
                front_article: entry.front_article(),
            });
        }

        let path_fst = build_path_fst(&entries)?;
        let title_fst = build_title_fst(&entries)?;
        let (fulltext, indexed) = if indexing {
            let index = build_fulltext(&pending)?;
            let indexed = index.indexed_docs as usize;
            (Some(index), indexed)
        } else {
            (None, 0)
        };

        let raw_clusters = packer.finish();
        let packed = raw_clusters
            .par_iter()
            .map(|raw| pack_cluster(raw, compression))
            .collect::<Result<Vec<_>, io::Error>>()?;

        let mut clusters = Vec::with_capacity(packed.len());
        let mut offset = 0u64;
        for ((bytes, compressed), raw) in packed.iter().zip(&raw_clusters) {
            clusters.push(ClusterRecord {
                offset,
                len: bytes.len() as u64,
                raw_len: raw.len() as u64,
                compressed: *compressed,
            });
            offset += bytes.len() as u64;
        }

        let directory = Directory {
            version: FORMAT_VERSION,
            entries,
            mimetypes: mimetypes.into_names(),
            clusters,
            main_entry,
            metadata: metadata
                .into_iter()
                .map(|(name, value)| MetadataRecord { name, value })
                .collect(),
            path_fst,
            title_fst,
            fulltext,
        };

        let archived = to_bytes::<RkyvError>(&directory)
            .map_err(|err| WriteError::Serialize(err.to_string()))?;
        let compressed_directory = zstd_compress(&archived, DIRECTORY_COMPRESSION_LEVEL)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&(compressed_directory.len() as u64).to_le_bytes())?;
        writer.write_all(&compressed_directory)?;
        for (bytes, _) in &packed {
            writer.write_all(bytes)?;
        }
        writer.flush()?;
        let total = writer.get_ref().metadata()?.len();

        let stats = PackStats {
            entries: directory.entries.len(),
            redirects: redirect_count,
            clusters: directory.clusters.len(),
            indexed,
            bytes: total,
        };
        if verbose {
            info!(path = %out.display(), ?stats, "archive written");
        } else {
            debug!(path = %out.display(), ?stats, "archive written");
        }
        Ok(stats)
    }
}

struct LoadedItem {
    path: String,
    title: String,
    mimetype: String,
    data: Vec<u8>,
    front_article: bool,
}

fn load_item(item: WriterItem) -> Result<LoadedItem, WriteError> {
    let data = match item.source {
        ItemSource::Bytes(bytes) => bytes,
        ItemSource::File(file) => fs::read(&file)?,
    };
    Ok(LoadedItem {
        path: item.path,
        title: item.title,
        mimetype: item.mimetype,
        data,
        front_article: item.front_article,
    })
}

enum Pending {
    Content(LoadedItem),
    Redirect(PendingRedirect),
}

impl Pending {
    fn path(&self) -> &str {
        match self {
            Pending::Content(item) => &item.path,
            Pending::Redirect(redirect) => &redirect.path,
        }
    }

    fn title(&self) -> &str {
        match self {
            Pending::Content(item) => &item.title,
            Pending::Redirect(redirect) => &redirect.title,
        }
    }

    fn front_article(&self) -> bool {
        matches!(self, Pending::Content(item) if item.front_article)
    }
}

#[derive(Default)]
struct MimeTable {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl MimeTable {
    fn intern(&mut self, mimetype: &str) -> u32 {
        if let Some(id) = self.ids.get(mimetype) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(mimetype.to_string());
        self.ids.insert(mimetype.to_string(), id);
        id
    }

    fn into_names(self) -> Vec<String> {
        self.names
    }
}

/// Appends payloads to fixed-size clusters in path order.
struct ClusterPacker {
    target: usize,
    done: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl ClusterPacker {
    fn new(target: usize) -> Self {
        Self {
            target,
            done: Vec::new(),
            current: Vec::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> (u32, u32) {
        if !self.current.is_empty() && self.current.len() + data.len() > self.target {
            self.done.push(std::mem::take(&mut self.current));
        }
        let cluster = self.done.len() as u32;
        let offset = self.current.len() as u32;
        self.current.extend_from_slice(data);
        (cluster, offset)
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}

fn pack_cluster(raw: &[u8], compression: Compression) -> Result<(Vec<u8>, bool), io::Error> {
    if compression == Compression::Zstd {
        let compressed = zstd_compress(raw, CLUSTER_COMPRESSION_LEVEL)?;
        if compressed.len() < raw.len() {
            return Ok((compressed, true));
        }
    }
    Ok((raw.to_vec(), false))
}

fn build_path_fst(entries: &[EntryRecord]) -> Result<Vec<u8>, WriteError> {
    let mut builder = MapBuilder::memory();
    for (index, entry) in entries.iter().enumerate() {
        builder.insert(entry.path.as_bytes(), index as u64)?;
    }
    Ok(builder.into_inner()?)
}

fn title_key(title: &str, index: EntryId) -> Vec<u8> {
    let mut key = text::normalize_title(title).into_bytes();
    key.push(0);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn build_title_fst(entries: &[EntryRecord]) -> Result<Vec<u8>, WriteError> {
    let mut keys: Vec<(Vec<u8>, u64)> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.front_article)
        .map(|(index, entry)| {
            let title = if entry.title.is_empty() { &entry.path } else { &entry.title };
            (title_key(title, index as EntryId), index as u64)
        })
        .collect();
    keys.sort();
    let mut builder = MapBuilder::memory();
    for (key, value) in keys {
        builder.insert(key, value)?;
    }
    Ok(builder.into_inner()?)
}

fn build_fulltext(entries: &[Pending]) -> Result<FulltextIndex, WriteError> {
    let documents: Vec<(EntryId, HashMap<String, u32>, u32)> = entries
        .par_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            Pending::Content(item) if item.front_article && text::is_indexable(&item.mimetype) => {
                Some((index as EntryId, item))
            }
            _ => None,
        })
        .map(|(index, item)| {
            let body = text::tokenize(&text::plain_text(&item.mimetype, &item.data));
            let title = text::tokenize(&item.title);
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for term in &body {
                *freqs.entry(term.clone()).or_default() += 1;
            }
            for term in &title {
                *freqs.entry(term.clone()).or_default() += TITLE_WEIGHT;
            }
            (index, freqs, (body.len() + title.len()) as u32)
        })
        .collect();

    let mut doc_lengths = vec![0u32; entries.len()];
    let mut by_term: BTreeMap<String, Vec<(EntryId, u32)>> = BTreeMap::new();
    let mut total_len = 0u64;
    for (index, freqs, len) in &documents {
        doc_lengths[*index as usize] = *len;
        total_len += u64::from(*len);
        for (term, freq) in freqs {
            by_term.entry(term.clone()).or_default().push((*index, *freq));
        }
    }

    let mut builder = MapBuilder::memory();
    let mut postings = Vec::with_capacity(by_term.len());
    let mut posting_docs = Vec::new();
    let mut posting_freqs = Vec::new();
    for (term_id, (term, mut docs)) in by_term.into_iter().enumerate() {
        docs.sort_unstable();
        builder.insert(term.as_bytes(), term_id as u64)?;
        postings.push(Range::new(posting_docs.len() as u32, docs.len() as u32));
        for (doc, freq) in docs {
            posting_docs.push(doc);
            posting_freqs.push(freq);
        }
    }

    let indexed_docs = documents.len() as u32;
    Ok(FulltextIndex {
        term_fst: builder.into_inner()?,
        postings,
        posting_docs,
        posting_freqs,
        doc_lengths,
        indexed_docs,
        avg_doc_len: if indexed_docs == 0 {
            0.0
        } else {
            total_len as f32 / indexed_docs as f32
        },
    })
}
