//! Relation search over extracted triples
//!
//! Matches the query's candidate (subject, predicate, object) patterns
//! against stored triples. A slot matches its triple field exactly (after
//! normalization, including containment) or fuzzily by character-bigram
//! similarity above a tunable threshold. The raw score is the fraction of
//! filled slots that matched, so it lives in [0,1].
//!
//! Queries with no detectable syntactic pattern fall back to plain token
//! overlap against the triple's derived search key, keeping the channel
//! useful for keyword-style queries.

use super::{ChannelHit, ChannelKind, RetrievalRequest, Retriever};
use crate::query::RelationPattern;
use quarry_common::errors::Result;
use quarry_common::store::{keys, ChunkStore, Triple};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct RelationRetriever {
    store: Arc<ChunkStore>,
    /// Fuzzy slot-match threshold; see `SearchConfig::fuzzy_match_threshold`
    fuzzy_threshold: f32,
}

impl RelationRetriever {
    pub fn new(store: Arc<ChunkStore>, fuzzy_threshold: f32) -> Self {
        Self {
            store,
            fuzzy_threshold,
        }
    }

    fn slot_matches(&self, slot: &str, field: &str) -> bool {
        let slot_norm = keys::normalize(slot);
        let field_norm = keys::normalize(field);
        if slot_norm == field_norm
            || field_norm.contains(&slot_norm)
            || slot_norm.contains(&field_norm)
        {
            return true;
        }
        keys::bigram_similarity(&slot_norm, &field_norm) >= self.fuzzy_threshold
    }

    /// Score one pattern against one triple: (matched fraction, matched count)
    fn score_pattern(&self, pattern: &RelationPattern, triple: &Triple) -> (f32, usize) {
        let slots = [
            (pattern.subject.as_deref(), triple.subject.as_str()),
            (pattern.predicate.as_deref(), triple.predicate.as_str()),
            (pattern.object.as_deref(), triple.object.as_str()),
        ];

        let mut filled = 0usize;
        let mut matched = 0usize;
        for (slot, field) in slots {
            if let Some(slot) = slot {
                filled += 1;
                if self.slot_matches(slot, field) {
                    matched += 1;
                }
            }
        }

        if filled == 0 {
            (0.0, 0)
        } else {
            (matched as f32 / filled as f32, matched)
        }
    }

    /// Fallback for queries without a syntactic pattern: fraction of
    /// distinct query tokens present in the triple's search key
    fn score_tokens(tokens: &[String], triple: &Triple) -> (f32, usize) {
        if tokens.is_empty() {
            return (0.0, 0);
        }
        let mut distinct: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let matched = distinct
            .iter()
            .filter(|t| triple.search_key.iter().any(|k| k == *t))
            .count();
        (matched as f32 / distinct.len() as f32, matched)
    }
}

#[async_trait::async_trait]
impl Retriever for RelationRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ChannelHit>> {
        // Best (score, matched slots) per chunk across all its triples
        let mut best: HashMap<Uuid, (ChannelHit, usize)> = HashMap::new();

        self.store.visit_triples(&request.scope, |triple| {
            let (score, matched) = if request.patterns.is_empty() {
                Self::score_tokens(&request.tokens, triple)
            } else {
                request
                    .patterns
                    .iter()
                    .map(|p| self.score_pattern(p, triple))
                    .max_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
                    .unwrap_or((0.0, 0))
            };

            if score <= 0.0 {
                return;
            }

            let hit = ChannelHit {
                chunk_id: triple.chunk_id,
                document_id: triple.document_id,
                page_num: triple.page_num,
                chunk_index: triple.chunk_index,
                raw_score: score,
            };

            best.entry(triple.chunk_id)
                .and_modify(|(existing, existing_matched)| {
                    if score > existing.raw_score
                        || (score == existing.raw_score && matched > *existing_matched)
                    {
                        *existing = hit.clone();
                        *existing_matched = matched;
                    }
                })
                .or_insert((hit, matched));
        });

        // Ties break by matched slots descending, then position
        let mut ranked: Vec<(ChannelHit, usize)> = best.into_values().collect();
        ranked.sort_by(|(a, a_matched), (b, b_matched)| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then_with(|| b_matched.cmp(a_matched))
                .then_with(|| a.page_num.cmp(&b.page_num))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        ranked.truncate(request.top_k);

        Ok(ranked.into_iter().map(|(hit, _)| hit).collect())
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Relation
    }
}
