//! Multi-channel retrieval system
//!
//! Provides three retrieval channels over the chunk store:
//! - Semantic search (cosine similarity over CHILD chunk embeddings)
//! - Lexical search (term-frequency overlap against derived lexical keys)
//! - Relation search (slot matching over extracted triples)
//!
//! The channels run concurrently per query and report into the RRF fusion
//! join point; none of them mutates shared state.

mod lexical;
mod relation;
mod semantic;

pub mod fusion;

pub use lexical::LexicalRetriever;
pub use relation::RelationRetriever;
pub use semantic::SemanticRetriever;

use crate::query::RelationPattern;
use quarry_common::errors::Result;
pub use quarry_common::errors::ChannelKind;
use std::collections::HashSet;
use uuid::Uuid;

/// A scored hit from a single retrieval channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub page_num: u32,
    pub chunk_index: u32,
    /// Channel-native score; scales differ between channels and are never
    /// compared across them
    pub raw_score: f32,
}

/// Channel request parameters
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Searchable document ids (completed documents, optionally scoped)
    pub scope: HashSet<Uuid>,

    /// Lexical query tokens
    pub tokens: Vec<String>,

    /// Candidate relation patterns
    pub patterns: Vec<RelationPattern>,

    /// Query embedding; required by the semantic channel only
    pub query_embedding: Option<Vec<f32>>,

    /// Maximum hits per channel
    pub top_k: usize,
}

/// Common trait for all retrieval channels
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve at most `top_k` hits, highest raw score first, ties broken
    /// by (document_id, page_num, chunk_index) ascending. An empty index
    /// for the requested scope yields an empty list, not an error.
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ChannelHit>>;

    /// The channel this retriever serves
    fn channel(&self) -> ChannelKind;
}

/// Sort hits by raw score descending, then (document_id, page_num,
/// chunk_index) ascending for determinism, and truncate to `top_k`.
pub(crate) fn rank_hits(mut hits: Vec<ChannelHit>, top_k: usize) -> Vec<ChannelHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.page_num.cmp(&b.page_num))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    hits.truncate(top_k);
    hits
}
