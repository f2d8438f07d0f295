//! Lexical search over derived keys
//!
//! Term-frequency weighted overlap between the query tokens and each
//! chunk's lexical key. Both CHILD and PARENT chunks are keyword-searchable;
//! the assembler later collapses parent/child duplicates per page.

use super::{rank_hits, ChannelHit, ChannelKind, RetrievalRequest, Retriever};
use quarry_common::errors::Result;
use quarry_common::store::ChunkStore;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LexicalRetriever {
    store: Arc<ChunkStore>,
}

impl LexicalRetriever {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }
}

/// Overlap score in [0,1]: sum over query tokens of tf * idf against the
/// chunk's key, normalized by the maximum attainable idf mass. Chunks
/// sharing no token score 0.
pub(crate) fn overlap_score(query_tokens: &[String], key: &[String]) -> f32 {
    if query_tokens.is_empty() || key.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<&str, usize> = HashMap::new();
    for token in key {
        *freq.entry(token.as_str()).or_insert(0) += 1;
    }
    let length = key.len() as f32;

    let mut score = 0.0f32;
    let mut max_score = 0.0f32;

    for token in query_tokens {
        let count = freq.get(token.as_str()).copied().unwrap_or(0);
        let tf = count as f32 / length;
        let idf = (1.0 + 1.0 / (1.0 + count as f32)).ln();
        score += tf * idf;
        max_score += idf;
    }

    if max_score > 0.0 {
        score / max_score
    } else {
        0.0
    }
}

#[async_trait::async_trait]
impl Retriever for LexicalRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ChannelHit>> {
        if request.tokens.is_empty() {
            return Ok(vec![]);
        }

        let mut hits = Vec::new();
        self.store.visit_chunks(&request.scope, |chunk| {
            let score = overlap_score(&request.tokens, &chunk.lexical_key);
            if score > 0.0 {
                hits.push(ChannelHit {
                    chunk_id: chunk.id,
                    document_id: chunk.document_id,
                    page_num: chunk.page_num,
                    chunk_index: chunk.chunk_index,
                    raw_score: score,
                });
            }
        });

        Ok(rank_hits(hits, request.top_k))
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Lexical
    }
}
