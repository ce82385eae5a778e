//! Fixtures shared by the unit tests: small packed archives built on disk and
//! an in-memory engine that counts every native release.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::{
    Engine, EngineError, EngineResult, HitCursor, NativeArchive, NativeEntry, NativeItem,
    NativeSearch, NativeSearcher, NativeSuggestionSearcher, RawHit,
};
use crate::{Compression, Creator, WriterItem};

pub(crate) const INDEX_HTML: &str = "<html><head><title>Home</title></head><body>\
<h1>Welcome</h1><p>Start at the <a href=\"a/b/c.html\">deep page</a>.</p></body></html>";

/// Mixed content: html, css, an image, redirects, metadata and a main page.
pub(crate) fn sample_archive(dir: &Path) -> PathBuf {
    let path = dir.join("sample.folio");
    let mut creator = Creator::start(&path).unwrap();
    creator.config_compression(Compression::Zstd).config_cluster_size(64);
    creator.add_metadata("Title", "Sample Archive").unwrap();
    creator.add_metadata("Language", "eng").unwrap();
    creator
        .add_item(
            WriterItem::from_bytes("index.html", "Home", "text/html", INDEX_HTML)
                .front_article(true),
        )
        .unwrap();
    creator
        .add_item(
            WriterItem::from_bytes(
                "about.html",
                "About",
                "text/html; charset=utf-8",
                "<html><body><p>About this collection.</p></body></html>",
            )
            .front_article(true),
        )
        .unwrap();
    creator
        .add_item(
            WriterItem::from_bytes(
                "a/b/c.html",
                "Deep Page",
                "text/html",
                "<p>Nested three levels down.</p>",
            )
            .front_article(true),
        )
        .unwrap();
    creator
        .add_item(WriterItem::from_bytes("style.css", "", "text/css", "body { margin: 0; }"))
        .unwrap();
    creator
        .add_item(WriterItem::from_bytes(
            "img/logo.png",
            "",
            "image/png",
            vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3],
        ))
        .unwrap();
    creator.add_redirect("home", "Home", "index.html").unwrap();
    creator.add_redirect("old/home", "Home", "home").unwrap();
    creator.set_main_path("index.html");
    creator.finish().unwrap();
    path
}

/// Three indexed articles about markup.
pub(crate) fn search_archive(dir: &Path) -> PathBuf {
    let path = dir.join("search.folio");
    let mut creator = Creator::start(&path).unwrap();
    creator.config_indexing(true);
    creator
        .add_item(
            WriterItem::from_bytes(
                "index",
                "Markdown Documentation",
                "text/html",
                "<h1>Markdown</h1><p>Markdown is a lightweight markup language. \
                 This documentation covers Markdown syntax and shows how pages are written.</p>",
            )
            .front_article(true),
        )
        .unwrap();
    creator
        .add_item(
            WriterItem::from_bytes(
                "guide/links.html",
                "Links and References",
                "text/html",
                "<p>Links connect pages to other pages across the whole collection. \
                 A reference can name a section, a file, an anchor or an external site, \
                 and every link is checked when the collection is built. Writers of \
                 Markdown use square brackets followed by parentheses to express links \
                 between pages, while plain text readers see the bracketed label.</p>",
            )
            .front_article(true),
        )
        .unwrap();
    creator
        .add_item(
            WriterItem::from_bytes(
                "guide/tables.html",
                "Tables",
                "text/html",
                "<p>Tables organize data into rows and columns.</p>",
            )
            .front_article(true),
        )
        .unwrap();
    creator
        .add_item(WriterItem::from_bytes("site.css", "", "text/css", "p { color: black; }"))
        .unwrap();
    creator.set_main_path("index");
    creator.finish().unwrap();
    path
}

/// Two pages, no full-text index, no html, no main page.
pub(crate) fn unindexed_archive(dir: &Path) -> PathBuf {
    let path = dir.join("plain.folio");
    let mut creator = Creator::start(&path).unwrap();
    creator.config_indexing(false).config_compression(Compression::None);
    creator
        .add_item(WriterItem::from_bytes("notes.txt", "Notes", "text/plain", "plain words"))
        .unwrap();
    creator
        .add_item(WriterItem::from_bytes("data.json", "", "application/json", "{}"))
        .unwrap();
    creator.finish().unwrap();
    path
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    archives: AtomicUsize,
    entries: AtomicUsize,
    items: AtomicUsize,
    searchers: AtomicUsize,
    searches: AtomicUsize,
    suggest_calls: AtomicUsize,
}

impl Counters {
    pub(crate) fn archives_released(&self) -> usize {
        self.archives.load(Ordering::SeqCst)
    }

    pub(crate) fn entries_released(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub(crate) fn items_released(&self) -> usize {
        self.items.load(Ordering::SeqCst)
    }

    pub(crate) fn searchers_released(&self) -> usize {
        self.searchers.load(Ordering::SeqCst)
    }

    pub(crate) fn searches_released(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub(crate) fn suggest_calls(&self) -> usize {
        self.suggest_calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Page {
    path: String,
    mimetype: String,
    title: String,
}

/// Engine serving fixed pages from memory. Every native value bumps a counter
/// when dropped; searches yield ten synthetic hits.
pub(crate) struct MockEngine {
    pages: Arc<Vec<Page>>,
    counters: Arc<Counters>,
    fail_after: Option<usize>,
}

const MOCK_HITS: usize = 10;

impl MockEngine {
    pub(crate) fn with_pages(pages: &[(&str, &str, &str)]) -> Self {
        let pages = pages
            .iter()
            .map(|(path, mimetype, title)| Page {
                path: path.to_string(),
                mimetype: mimetype.to_string(),
                title: title.to_string(),
            })
            .collect();
        Self {
            pages: Arc::new(pages),
            counters: Arc::default(),
            fail_after: None,
        }
    }

    /// Search cursors fail after yielding `hits` results.
    pub(crate) fn failing_after(mut self, hits: usize) -> Self {
        self.fail_after = Some(hits);
        self
    }

    pub(crate) fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

impl Engine for MockEngine {
    fn open(&self, _path: &Path) -> EngineResult<Box<dyn NativeArchive>> {
        Ok(Box::new(MockArchive {
            pages: Arc::clone(&self.pages),
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
        }))
    }
}

struct MockArchive {
    pages: Arc<Vec<Page>>,
    counters: Arc<Counters>,
    fail_after: Option<usize>,
}

impl MockArchive {
    fn entry(&self, page: &Page) -> Box<dyn NativeEntry> {
        Box::new(MockEntry {
            page: page.clone(),
            counters: Arc::clone(&self.counters),
        })
    }
}

impl Drop for MockArchive {
    fn drop(&mut self) {
        self.counters.archives.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeArchive for MockArchive {
    fn entry_count(&self) -> u64 {
        self.pages.len() as u64
    }

    fn entry_by_path(&self, path: &str) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        Ok(self
            .pages
            .iter()
            .find(|page| page.path == path)
            .map(|page| self.entry(page)))
    }

    fn entry_by_index(&self, index: u64) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|index| self.pages.get(index))
            .map(|page| self.entry(page)))
    }

    fn main_entry(&self) -> EngineResult<Option<Box<dyn NativeEntry>>> {
        Ok(self.pages.first().map(|page| self.entry(page)))
    }

    fn has_fulltext_index(&self) -> bool {
        true
    }

    fn metadata(&self, _name: &str) -> Option<String> {
        None
    }

    fn metadata_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn searcher(&self) -> EngineResult<Box<dyn NativeSearcher>> {
        Ok(Box::new(MockSearcher {
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
            count_suggest: false,
        }))
    }

    fn suggestion_searcher(&self) -> EngineResult<Box<dyn NativeSuggestionSearcher>> {
        Ok(Box::new(MockSearcher {
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
            count_suggest: true,
        }))
    }
}

struct MockEntry {
    page: Page,
    counters: Arc<Counters>,
}

impl Drop for MockEntry {
    fn drop(&mut self) {
        self.counters.entries.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeEntry for MockEntry {
    fn path(&self) -> String {
        self.page.path.clone()
    }

    fn title(&self) -> String {
        self.page.title.clone()
    }

    fn is_redirect(&self) -> bool {
        false
    }

    fn item(&self, _follow_redirects: bool) -> EngineResult<Box<dyn NativeItem>> {
        Ok(Box::new(MockItem {
            page: self.page.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockItem {
    page: Page,
    counters: Arc<Counters>,
}

impl Drop for MockItem {
    fn drop(&mut self) {
        self.counters.items.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeItem for MockItem {
    fn path(&self) -> String {
        self.page.path.clone()
    }

    fn title(&self) -> String {
        self.page.title.clone()
    }

    fn mimetype(&self) -> String {
        self.page.mimetype.clone()
    }

    fn size(&self) -> u64 {
        self.page.path.len() as u64
    }

    fn data(&self) -> EngineResult<Vec<u8>> {
        Ok(self.page.path.as_bytes().to_vec())
    }
}

struct MockSearcher {
    counters: Arc<Counters>,
    fail_after: Option<usize>,
    count_suggest: bool,
}

impl MockSearcher {
    fn session(&self) -> Box<dyn NativeSearch> {
        Box::new(MockSearch {
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
        })
    }
}

impl Drop for MockSearcher {
    fn drop(&mut self) {
        if !self.count_suggest {
            self.counters.searchers.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl NativeSearcher for MockSearcher {
    fn search(&self, _query: &str) -> EngineResult<Box<dyn NativeSearch>> {
        Ok(self.session())
    }
}

impl NativeSuggestionSearcher for MockSearcher {
    fn suggest(&self, _query: &str) -> EngineResult<Box<dyn NativeSearch>> {
        self.counters.suggest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.session())
    }
}

struct MockSearch {
    counters: Arc<Counters>,
    fail_after: Option<usize>,
}

impl Drop for MockSearch {
    fn drop(&mut self) {
        self.counters.searches.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeSearch for MockSearch {
    fn estimated_matches(&self) -> u64 {
        MOCK_HITS as u64
    }

    fn results(&self, offset: usize, limit: usize) -> EngineResult<HitCursor<'_>> {
        let end = offset.saturating_add(limit).min(MOCK_HITS);
        let fail_after = self.fail_after;
        Ok(Box::new((offset..end).enumerate().map(move |(yielded, rank)| {
            if fail_after.is_some_and(|limit| yielded >= limit) {
                return Err(EngineError::Format(format!("hit {rank} is unreadable")));
            }
            Ok(RawHit {
                path: format!("hit/{rank}.html"),
                title: format!("Hit {rank}"),
                snippet: format!("synthetic <b>hit</b> {rank}"),
                score: Some(100 - rank as i32),
                word_count: Some(10),
            })
        })))
    }
}
