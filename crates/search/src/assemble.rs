//! Result assembly
//!
//! Turns the fused ranking into wire-ready results: expands CHILD hits to
//! their PARENT context (falling back to the child's own text when the
//! parent is gone), deduplicates per page, extracts a snippet with
//! highlight spans, and converts normalized fusion scores into a 0-100
//! confidence figure.

use crate::retrieval::fusion::FusedChunk;
use quarry_common::store::{keys, ChunkStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Fallback snippet length when no query term matches the text
const FALLBACK_SNIPPET_CHARS: usize = 300;

/// Per-channel normalized scores surfaced with each result
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub lexical: f32,
    pub triple: f32,
    pub fusion: f32,
}

/// A highlighted span, with offsets into the snippet
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: u32,
    pub snippet: String,
    /// 0-100, from the fusion score min-max normalized across this result page
    pub confidence_score: u32,
    pub scores: ScoreBreakdown,
    pub highlights: Vec<Highlight>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_triples: Vec<MatchedTriple>,
}

pub struct Assembler {
    store: Arc<ChunkStore>,
    snippet_window: usize,
}

impl Assembler {
    pub fn new(store: Arc<ChunkStore>, snippet_window: usize) -> Self {
        Self {
            store,
            snippet_window,
        }
    }

    /// Assemble final results from the fused (and possibly reranked)
    /// ranking. Returns the results page and the pre-limit total.
    pub fn assemble(
        &self,
        query: &str,
        fused: &[FusedChunk],
        limit: usize,
    ) -> (Vec<SearchResult>, usize) {
        let deduped = deduplicate_by_page(fused);
        let total = deduped.len();

        let page: Vec<FusedChunk> = deduped.into_iter().take(limit).collect();
        let (min_fusion, max_fusion) = fusion_range(&page);

        let results = page
            .iter()
            .map(|chunk| self.build_result(query, chunk, min_fusion, max_fusion))
            .collect();
        (results, total)
    }

    fn build_result(
        &self,
        query: &str,
        fused: &FusedChunk,
        min_fusion: f32,
        max_fusion: f32,
    ) -> SearchResult {
        let document_name = self
            .store
            .document(fused.document_id)
            .map(|d| d.name)
            .unwrap_or_default();

        // PARENT context when available, the child's own text otherwise
        let text = self
            .store
            .chunk(fused.chunk_id)
            .map(|chunk| {
                self.store
                    .parent_of(&chunk)
                    .map(|parent| parent.chunk_text)
                    .unwrap_or(chunk.chunk_text)
            })
            .unwrap_or_default();

        let snippet = extract_snippet(&text, query, self.snippet_window);
        let highlights = highlight_matches(&snippet, query);

        let matched_triples = if fused.relation.rank.is_some() {
            self.store
                .triples_for_chunk(fused.chunk_id)
                .into_iter()
                .map(|t| MatchedTriple {
                    subject: t.subject,
                    predicate: t.predicate,
                    object: t.object,
                })
                .collect()
        } else {
            Vec::new()
        };

        let normalized_fusion = if max_fusion > min_fusion {
            (fused.fusion_score - min_fusion) / (max_fusion - min_fusion)
        } else if max_fusion > 0.0 {
            1.0
        } else {
            0.0
        };

        SearchResult {
            document_id: fused.document_id,
            document_name,
            page_number: fused.page_num,
            snippet,
            confidence_score: (normalized_fusion * 100.0).round() as u32,
            scores: ScoreBreakdown {
                semantic: fused.semantic.normalized,
                lexical: fused.lexical.normalized,
                triple: fused.relation.normalized,
                fusion: normalized_fusion,
            },
            highlights,
            matched_triples,
        }
    }
}

/// Keep the best-fused chunk per (document, page); losers donate their
/// per-channel normalized maxima so the survivor's breakdown reflects the
/// whole page.
fn deduplicate_by_page(fused: &[FusedChunk]) -> Vec<FusedChunk> {
    let mut seen: Vec<FusedChunk> = Vec::new();
    let mut pages: HashSet<(Uuid, u32)> = HashSet::new();

    for chunk in fused {
        let key = (chunk.document_id, chunk.page_num);
        if pages.insert(key) {
            seen.push(chunk.clone());
        } else if let Some(winner) = seen
            .iter_mut()
            .find(|c| (c.document_id, c.page_num) == key)
        {
            winner.semantic.normalized = winner.semantic.normalized.max(chunk.semantic.normalized);
            winner.lexical.normalized = winner.lexical.normalized.max(chunk.lexical.normalized);
            winner.relation.normalized = winner.relation.normalized.max(chunk.relation.normalized);
        }
    }
    seen
}

fn fusion_range(page: &[FusedChunk]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for chunk in page {
        min = min.min(chunk.fusion_score);
        max = max.max(chunk.fusion_score);
    }
    (min, max)
}

/// Window around the first query match: the full query phrase if it
/// occurs, otherwise the first significant query word. Without any match,
/// the text's 300-char prefix. `...` marks truncated edges.
fn extract_snippet(text: &str, query: &str, window: usize) -> String {
    let haystack = text.to_ascii_lowercase();

    let matched = find_phrase(&haystack, query).or_else(|| {
        keys::tokenize(query)
            .into_iter()
            .find_map(|word| haystack.find(&word).map(|pos| (pos, word.len())))
    });

    match matched {
        Some((pos, len)) => {
            let start = floor_boundary(text, pos.saturating_sub(window));
            let end = ceil_boundary(text, (pos + len + window).min(text.len()));
            let mut snippet = String::new();
            if start > 0 {
                snippet.push_str("...");
            }
            snippet.push_str(text[start..end].trim());
            if end < text.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None => {
            let end = ceil_boundary(text, FALLBACK_SNIPPET_CHARS.min(text.len()));
            let mut snippet = text[..end].trim().to_string();
            if end < text.len() {
                snippet.push_str("...");
            }
            snippet
        }
    }
}

fn find_phrase(haystack: &str, query: &str) -> Option<(usize, usize)> {
    let phrase = query.trim().to_ascii_lowercase();
    if phrase.is_empty() {
        return None;
    }
    haystack.find(&phrase).map(|pos| (pos, phrase.len()))
}

/// Exact-phrase occurrences first, then significant words (longer than 3
/// chars), skipping spans that overlap an earlier highlight.
fn highlight_matches(snippet: &str, query: &str) -> Vec<Highlight> {
    let haystack = snippet.to_ascii_lowercase();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    let phrase = query.trim().to_ascii_lowercase();
    if !phrase.is_empty() {
        collect_occurrences(&haystack, &phrase, &mut spans);
    }
    for word in keys::tokenize(query) {
        if word.len() > 3 {
            collect_occurrences(&haystack, &word, &mut spans);
        }
    }

    spans.sort_by_key(|(start, _)| *start);
    spans
        .into_iter()
        .map(|(start, end)| Highlight {
            start,
            end,
            text: snippet[start..end].to_string(),
        })
        .collect()
}

fn collect_occurrences(haystack: &str, needle: &str, spans: &mut Vec<(usize, usize)>) {
    let mut from = 0;
    while let Some(found) = haystack[from..].find(needle) {
        let start = from + found;
        let end = start + needle.len();
        let overlaps = spans.iter().any(|(s, e)| start < *e && end > *s);
        if !overlaps {
            spans.push((start, end));
        }
        from = end;
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::fusion::SignalScore;
    use quarry_common::store::{ChunkType, Document, DocumentStatus, NewChunk};

    fn fused_at(doc: Uuid, chunk: Uuid, page: u32, index: u32, score: f32) -> FusedChunk {
        FusedChunk {
            chunk_id: chunk,
            document_id: doc,
            page_num: page,
            chunk_index: index,
            semantic: SignalScore::default(),
            lexical: SignalScore::default(),
            relation: SignalScore::default(),
            fusion_score: score,
        }
    }

    #[test]
    fn test_snippet_windows_around_match() {
        let text = format!("{} revenue increased 20% {}", "x".repeat(400), "y".repeat(400));
        let snippet = extract_snippet(&text, "revenue increased", 150);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("revenue increased 20%"));
        assert!(snippet.len() < text.len());
    }

    #[test]
    fn test_snippet_no_truncation_markers_for_short_text() {
        let text = "Revenue increased 20% year over year.";
        let snippet = extract_snippet(text, "revenue", 150);
        assert_eq!(snippet, text);
    }

    #[test]
    fn test_snippet_falls_back_to_prefix() {
        let text = "a".repeat(500);
        let snippet = extract_snippet(&text, "unrelated query", 150);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.len(), 303);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let text = "é".repeat(400);
        let snippet = extract_snippet(&text, "nothing matches", 150);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_highlights_phrase_then_words_without_overlap() {
        let snippet = "Total revenue increased while revenue forecasts held.";
        let highlights = highlight_matches(snippet, "revenue increased");

        assert!(highlights
            .iter()
            .any(|h| h.text.eq_ignore_ascii_case("revenue increased")));
        // The standalone later "revenue" is highlighted as a word
        assert!(highlights.iter().filter(|h| h.text.eq_ignore_ascii_case("revenue")).count() >= 1);
        // No overlapping spans
        for pair in highlights.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_dedup_keeps_best_and_merges_breakdowns() {
        let doc = Uuid::from_u128(1);
        let mut a = fused_at(doc, Uuid::from_u128(10), 3, 0, 0.9);
        a.semantic.normalized = 1.0;
        let mut b = fused_at(doc, Uuid::from_u128(11), 3, 1, 0.4);
        b.lexical.normalized = 0.8;

        let deduped = deduplicate_by_page(&[a, b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].chunk_id, Uuid::from_u128(10));
        assert_eq!(deduped[0].semantic.normalized, 1.0);
        assert_eq!(deduped[0].lexical.normalized, 0.8);
    }

    #[test]
    fn test_assemble_expands_to_parent_context() {
        let store = Arc::new(ChunkStore::new());
        let doc = store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed));
        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 0,
                chunk_type: ChunkType::Parent,
                parent_chunk_id: None,
                chunk_text: "Full context: revenue increased 20% year over year amid cost cuts."
                    .to_string(),
                token_count: 12,
            }])
            .unwrap();
        let child_ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 1,
                chunk_type: ChunkType::Child,
                parent_chunk_id: Some(parent_ids[0]),
                chunk_text: "revenue increased 20%".to_string(),
                token_count: 4,
            }])
            .unwrap();

        let assembler = Assembler::new(store, 150);
        let fused = vec![fused_at(doc, child_ids[0], 1, 1, 0.5)];
        let (results, total) = assembler.assemble("revenue increased", &fused, 20);

        assert_eq!(total, 1);
        assert_eq!(results[0].document_name, "report.pdf");
        assert!(results[0].snippet.contains("Full context"));
        assert_eq!(results[0].confidence_score, 100);
    }

    #[test]
    fn test_assemble_orphaned_child_uses_own_text() {
        let store = Arc::new(ChunkStore::new());
        let doc = store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed));
        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 0,
                chunk_type: ChunkType::Parent,
                parent_chunk_id: None,
                chunk_text: "parent context".to_string(),
                token_count: 2,
            }])
            .unwrap();
        let child_ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 1,
                chunk_type: ChunkType::Child,
                parent_chunk_id: Some(parent_ids[0]),
                chunk_text: "child text about revenue".to_string(),
                token_count: 4,
            }])
            .unwrap();
        store.delete_chunk(parent_ids[0]).unwrap();

        let assembler = Assembler::new(store, 150);
        let fused = vec![fused_at(doc, child_ids[0], 1, 1, 0.5)];
        let (results, _) = assembler.assemble("revenue", &fused, 20);

        assert_eq!(results[0].snippet, "child text about revenue");
    }

    #[test]
    fn test_total_results_counted_before_limit() {
        let store = Arc::new(ChunkStore::new());
        let doc = store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed));
        let assembler = Assembler::new(store, 150);

        let fused: Vec<FusedChunk> = (0..5)
            .map(|i| {
                fused_at(
                    doc,
                    Uuid::from_u128(100 + i as u128),
                    i,
                    0,
                    1.0 - i as f32 * 0.1,
                )
            })
            .collect();
        let (results, total) = assembler.assemble("query", &fused, 2);

        assert_eq!(results.len(), 2);
        assert_eq!(total, 5);
    }

    #[test]
    fn test_confidence_spreads_across_page() {
        let store = Arc::new(ChunkStore::new());
        let doc = store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed));
        let assembler = Assembler::new(store, 150);

        let fused = vec![
            fused_at(doc, Uuid::from_u128(1), 1, 0, 0.9),
            fused_at(doc, Uuid::from_u128(2), 2, 0, 0.6),
            fused_at(doc, Uuid::from_u128(3), 3, 0, 0.3),
        ];
        let (results, _) = assembler.assemble("query", &fused, 20);

        assert_eq!(results[0].confidence_score, 100);
        assert_eq!(results[1].confidence_score, 50);
        assert_eq!(results[2].confidence_score, 0);
    }
}
