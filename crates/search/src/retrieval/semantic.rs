//! Semantic similarity search over the vector index
//!
//! Scores the query embedding against stored CHILD chunk embeddings by
//! cosine similarity. Only CHILD chunks marked embedded are eligible;
//! anything else in the vector index is skipped.

use super::{rank_hits, ChannelHit, ChannelKind, RetrievalRequest, Retriever};
use quarry_common::errors::{AppError, Result};
use quarry_common::store::{ChunkStore, ChunkType, VectorIndex};
use std::sync::Arc;

pub struct SemanticRetriever {
    store: Arc<ChunkStore>,
    vectors: Arc<VectorIndex>,
}

impl SemanticRetriever {
    pub fn new(store: Arc<ChunkStore>, vectors: Arc<VectorIndex>) -> Self {
        Self { store, vectors }
    }
}

#[async_trait::async_trait]
impl Retriever for SemanticRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ChannelHit>> {
        let embedding =
            request
                .query_embedding
                .as_ref()
                .ok_or_else(|| AppError::ChannelUnavailable {
                    channel: ChannelKind::Semantic,
                    message: "semantic search requires a query embedding".to_string(),
                })?;

        let scored = self.vectors.score_all(embedding)?;

        let mut hits = Vec::new();
        for (chunk_id, score) in scored {
            let Some(chunk) = self.store.chunk(chunk_id) else {
                // Vector for a chunk deleted mid-flight; skip it
                continue;
            };
            if chunk.chunk_type != ChunkType::Child || !chunk.embedded {
                continue;
            }
            if !request.scope.contains(&chunk.document_id) {
                continue;
            }
            hits.push(ChannelHit {
                chunk_id,
                document_id: chunk.document_id,
                page_num: chunk.page_num,
                chunk_index: chunk.chunk_index,
                raw_score: score,
            });
        }

        Ok(rank_hits(hits, request.top_k))
    }

    fn channel(&self) -> ChannelKind {
        ChannelKind::Semantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::store::{Document, DocumentStatus, NewChunk};
    use std::collections::HashSet;
    use uuid::Uuid;

    fn setup() -> (Arc<ChunkStore>, Arc<VectorIndex>, Uuid) {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(2, "test-model-v1"));
        let doc =
            store.insert_document(Document::new("doc.pdf", 5, DocumentStatus::Completed));
        (store, vectors, doc)
    }

    fn add_child(
        store: &ChunkStore,
        vectors: &VectorIndex,
        doc: Uuid,
        page: u32,
        index: u32,
        vector: Vec<f32>,
    ) -> Uuid {
        let ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: page,
                chunk_index: index,
                chunk_type: ChunkType::Child,
                parent_chunk_id: None,
                chunk_text: "text".to_string(),
                token_count: 1,
            }])
            .unwrap();
        vectors.upsert(ids[0], vector).unwrap();
        store.mark_embedded(ids[0]).unwrap();
        ids[0]
    }

    fn request(scope: HashSet<Uuid>, embedding: Vec<f32>) -> RetrievalRequest {
        RetrievalRequest {
            scope,
            tokens: vec![],
            patterns: vec![],
            query_embedding: Some(embedding),
            top_k: 10,
        }
    }

    #[tokio::test]
    async fn test_orders_by_cosine_similarity() {
        let (store, vectors, doc) = setup();
        let near = add_child(&store, &vectors, doc, 1, 0, vec![1.0, 0.0]);
        let far = add_child(&store, &vectors, doc, 1, 1, vec![0.0, 1.0]);

        let retriever = SemanticRetriever::new(store.clone(), vectors.clone());
        let hits = retriever
            .retrieve(&request([doc].into(), vec![1.0, 0.05]))
            .await
            .unwrap();

        assert_eq!(hits[0].chunk_id, near);
        assert_eq!(hits[1].chunk_id, far);
    }

    #[tokio::test]
    async fn test_scope_filters_documents() {
        let (store, vectors, doc) = setup();
        add_child(&store, &vectors, doc, 1, 0, vec![1.0, 0.0]);

        let other =
            store.insert_document(Document::new("other.pdf", 1, DocumentStatus::Completed));
        let retriever = SemanticRetriever::new(store, vectors);
        let hits = retriever
            .retrieve(&request([other].into(), vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_is_not_an_error() {
        let (store, vectors, doc) = setup();
        let retriever = SemanticRetriever::new(store, vectors);
        let hits = retriever
            .retrieve(&request([doc].into(), vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_missing_embedding_is_unavailable() {
        let (store, vectors, doc) = setup();
        let retriever = SemanticRetriever::new(store, vectors);
        let mut req = request([doc].into(), vec![]);
        req.query_embedding = None;
        let err = retriever.retrieve(&req).await.unwrap_err();
        assert!(matches!(err, AppError::ChannelUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_parent_chunks_never_returned() {
        let (store, vectors, doc) = setup();
        let ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 0,
                chunk_type: ChunkType::Parent,
                parent_chunk_id: None,
                chunk_text: "context".to_string(),
                token_count: 1,
            }])
            .unwrap();
        // A stray parent vector must not produce a hit
        vectors.upsert(ids[0], vec![1.0, 0.0]).unwrap();

        let retriever = SemanticRetriever::new(store, vectors);
        let hits = retriever
            .retrieve(&request([doc].into(), vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_chunk_vector_skipped() {
        let (store, vectors, doc) = setup();
        let id = add_child(&store, &vectors, doc, 1, 0, vec![1.0, 0.0]);
        store.delete_chunk(id).unwrap();

        let retriever = SemanticRetriever::new(store, vectors);
        let hits = retriever
            .retrieve(&request([doc].into(), vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
