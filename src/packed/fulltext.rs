//! BM25 full-text search over the archive's inverted index.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::format::{ArchivedFulltextIndex, EntryId};
use super::reader::Shared;
use super::text;
use crate::engine::{
    EngineError, EngineResult, HitCursor, NativeSearch, NativeSearcher, RawHit,
};

/// BM25 term-frequency saturation.
const K1: f32 = 1.2;
/// BM25 length normalization.
const B: f32 = 0.75;

pub(crate) struct FulltextSearcher {
    shared: Arc<Shared>,
}

impl FulltextSearcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl NativeSearcher for FulltextSearcher {
    fn search(&self, query: &str) -> EngineResult<Box<dyn NativeSearch>> {
        if query.contains('\0') {
            return Err(EngineError::Query("NUL in query".into()));
        }
        let terms = text::tokenize_unique(query);
        let index = self
            .shared
            .directory()
            .fulltext
            .as_ref()
            .ok_or(EngineError::NoFulltextIndex)?;
        let hits = rank(&self.shared, index, &terms);
        trace!(query, terms = terms.len(), hits = hits.len(), "ranked full-text query");
        Ok(Box::new(FulltextSearch {
            shared: Arc::clone(&self.shared),
            terms,
            hits,
        }))
    }
}

/// Scores every document containing at least one query term, best first.
/// Equal scores fall back to entry order so results are deterministic.
fn rank(shared: &Shared, index: &ArchivedFulltextIndex, terms: &[String]) -> Vec<(EntryId, f32)> {
    let Some(term_map) = shared.terms() else {
        return Vec::new();
    };
    let docs = index.indexed_docs.to_native() as f32;
    let avg_len = index.avg_doc_len.to_native().max(1.0);
    let mut scores: HashMap<EntryId, f32> = HashMap::new();

    for term in terms {
        let Some(term_id) = term_map.get(term) else {
            continue;
        };
        let Some(range) = index.postings.get(term_id as usize) else {
            continue;
        };
        let start = range.start.to_native() as usize;
        let end = start + range.len.to_native() as usize;
        let df = (end - start) as f32;
        let idf = ((docs - df + 0.5) / (df + 0.5) + 1.0).ln();

        for (doc, freq) in index.posting_docs[start..end]
            .iter()
            .zip(&index.posting_freqs[start..end])
        {
            let doc = doc.to_native();
            let tf = freq.to_native() as f32;
            let len = index
                .doc_lengths
                .get(doc as usize)
                .map_or(0.0, |len| len.to_native() as f32);
            let norm = K1 * (1.0 - B + B * len / avg_len);
            *scores.entry(doc).or_default() += idf * tf * (K1 + 1.0) / (tf + norm);
        }
    }

    let mut ranked: Vec<(EntryId, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Maps a raw score onto `1..=100` relative to the best hit.
fn scale_score(score: f32, best: f32) -> i32 {
    if best <= 0.0 {
        return 1;
    }
    ((score / best) * 100.0).round().clamp(1.0, 100.0) as i32
}

struct FulltextSearch {
    shared: Arc<Shared>,
    terms: Vec<String>,
    hits: Vec<(EntryId, f32)>,
}

impl FulltextSearch {
    fn hit(&self, id: EntryId, score: f32, best: f32) -> EngineResult<RawHit> {
        let mimetype = self.shared.mimetype_of(id)?;
        let data = self.shared.content(id)?;
        let body = text::plain_text(&mimetype, &data);
        let word_count = self
            .shared
            .directory()
            .fulltext
            .as_ref()
            .and_then(|index| index.doc_lengths.get(id as usize))
            .map_or(0, |len| len.to_native());
        Ok(RawHit {
            path: self.shared.path_of(id)?,
            title: self.shared.title_of(id)?,
            snippet: text::snippet(&body, &self.terms),
            score: Some(scale_score(score, best)),
            word_count: Some(word_count),
        })
    }
}

impl NativeSearch for FulltextSearch {
    fn estimated_matches(&self) -> u64 {
        self.hits.len() as u64
    }

    fn results(&self, offset: usize, limit: usize) -> EngineResult<HitCursor<'_>> {
        let best = self.hits.first().map_or(0.0, |(_, score)| *score);
        Ok(Box::new(
            self.hits
                .iter()
                .skip(offset)
                .take(limit)
                .map(move |&(id, score)| self.hit(id, score, best)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::engine::NativeArchive;
    use crate::packed::reader::PackedArchive;
    use crate::testing::search_archive;

    fn searcher(dir: &std::path::Path) -> Box<dyn NativeSearcher> {
        let archive =
            PackedArchive::open(&search_archive(dir), NonZeroUsize::new(4).unwrap()).unwrap();
        archive.searcher().unwrap()
    }

    #[test]
    fn scores_are_scaled_against_the_best_hit() {
        assert_eq!(scale_score(5.0, 5.0), 100);
        assert_eq!(scale_score(2.5, 5.0), 50);
        assert_eq!(scale_score(0.0001, 5.0), 1);
        assert_eq!(scale_score(1.0, 0.0), 1);
    }

    #[test]
    fn title_terms_outweigh_body_mentions() {
        let dir = tempfile::tempdir().unwrap();
        let search = searcher(dir.path()).search("tables").unwrap();
        let hits: Vec<RawHit> = search.results(0, 10).unwrap().map(Result::unwrap).collect();
        assert_eq!(hits[0].path, "guide/tables.html");
        assert_eq!(hits[0].score, Some(100));
    }

    #[test]
    fn unknown_terms_match_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let search = searcher(dir.path()).search("xylophone").unwrap();
        assert_eq!(search.estimated_matches(), 0);
        assert_eq!(search.results(0, 10).unwrap().count(), 0);
    }

    #[test]
    fn stylesheets_are_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let search = searcher(dir.path()).search("color black").unwrap();
        assert_eq!(search.estimated_matches(), 0);
    }
}
