//! On-disk layout of a packed archive.
//!
//! ```text
//! magic "FOLIOAR1" | u64 LE directory length | zstd(rkyv Directory) | clusters...
//! ```
//!
//! Cluster offsets are relative to the first byte after the directory.

use rkyv::{Archive, Serialize};

pub const MAGIC: &[u8; 8] = b"FOLIOAR1";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: u64 = 16;

pub type EntryId = u32;

#[derive(Archive, Serialize, Debug, Clone, Copy, Default)]
pub struct Range {
    pub start: u32,
    pub len: u32,
}

impl Range {
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }
}

#[derive(Archive, Serialize, Debug)]
pub enum EntryKind {
    Content {
        mimetype: u32,
        cluster: u32,
        offset: u32,
        len: u32,
    },
    Redirect {
        target: EntryId,
    },
}

#[derive(Archive, Serialize, Debug)]
pub struct EntryRecord {
    pub path: String,
    pub title: String,
    pub kind: EntryKind,
    pub front_article: bool,
}

#[derive(Archive, Serialize, Debug, Clone, Copy)]
pub struct ClusterRecord {
    pub offset: u64,
    pub len: u64,
    pub raw_len: u64,
    pub compressed: bool,
}

#[derive(Archive, Serialize, Debug)]
pub struct MetadataRecord {
    pub name: String,
    pub value: String,
}

/// Inverted index over front-article text.
///
/// `term_fst` maps each term to its id; `postings[id]` selects a run of
/// `posting_docs` / `posting_freqs` sorted by entry id. Title occurrences are
/// already weighted into the frequencies.
#[derive(Archive, Serialize, Debug, Default)]
pub struct FulltextIndex {
    pub term_fst: Vec<u8>,
    pub postings: Vec<Range>,
    pub posting_docs: Vec<EntryId>,
    pub posting_freqs: Vec<u32>,
    /// Indexed word count per entry, zero for entries outside the index.
    pub doc_lengths: Vec<u32>,
    pub indexed_docs: u32,
    pub avg_doc_len: f32,
}

#[derive(Archive, Serialize, Debug)]
pub struct Directory {
    pub version: u32,
    /// Sorted by path; the position is the entry id.
    pub entries: Vec<EntryRecord>,
    pub mimetypes: Vec<String>,
    pub clusters: Vec<ClusterRecord>,
    pub main_entry: Option<EntryId>,
    pub metadata: Vec<MetadataRecord>,
    /// path -> entry id
    pub path_fst: Vec<u8>,
    /// normalized title, NUL, big-endian id -> entry id (front articles only)
    pub title_fst: Vec<u8>,
    pub fulltext: Option<FulltextIndex>,
}
