//! Search pipeline orchestration
//!
//! Runs the three retrieval channels concurrently with per-channel
//! timeouts, fuses their rankings with RRF, applies the optional rerank
//! stage, and assembles wire-ready results. A failed or timed-out channel
//! degrades to an empty contribution; the query fails only when every
//! channel errored.

use crate::assemble::{Assembler, SearchResult};
use crate::query::QueryProcessor;
use crate::rerank::{HttpReranker, RerankAdapter, Reranker};
use crate::retrieval::fusion::{self, ChannelLists};
use crate::retrieval::{
    ChannelHit, ChannelKind, LexicalRetriever, RelationRetriever, RetrievalRequest, Retriever,
    SemanticRetriever,
};
use quarry_common::config::{RerankConfig, SearchConfig};
use quarry_common::embeddings::Embedder;
use quarry_common::errors::{AppError, Result};
use quarry_common::metrics::{record_channel, record_search};
use quarry_common::store::{ChunkStore, VectorIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Final outcome of one search request
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    /// Wall-clock seconds spent serving the query
    pub search_time: f64,
}

pub struct SearchPipeline {
    store: Arc<ChunkStore>,
    embedder: Arc<dyn Embedder>,
    query_processor: QueryProcessor,
    semantic: Arc<dyn Retriever>,
    lexical: Arc<dyn Retriever>,
    relation: Arc<dyn Retriever>,
    rerank: RerankAdapter,
    assembler: Assembler,
    channel_timeout: Duration,
    channel_top_k: usize,
}

impl SearchPipeline {
    pub fn new(
        store: Arc<ChunkStore>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        search: &SearchConfig,
        rerank: &RerankConfig,
    ) -> Self {
        let reranker: Option<Arc<dyn Reranker>> = rerank
            .url
            .as_ref()
            .map(|url| Arc::new(HttpReranker::new(url.clone())) as Arc<dyn Reranker>);

        Self {
            store: store.clone(),
            embedder,
            query_processor: QueryProcessor::new(),
            semantic: Arc::new(SemanticRetriever::new(store.clone(), vectors)),
            lexical: Arc::new(LexicalRetriever::new(store.clone())),
            relation: Arc::new(RelationRetriever::new(
                store.clone(),
                search.fuzzy_match_threshold,
            )),
            rerank: RerankAdapter::new(
                reranker,
                store.clone(),
                rerank.top_n,
                Duration::from_millis(rerank.timeout_ms),
            ),
            assembler: Assembler::new(store, search.snippet_window),
            channel_timeout: Duration::from_millis(search.channel_timeout_ms),
            channel_top_k: search.channel_top_k,
        }
    }

    /// Serve one query over the given document scope.
    pub async fn search(
        &self,
        query: &str,
        document_ids: Option<&[Uuid]>,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let parsed = self.query_processor.parse(query)?;

        let base = RetrievalRequest {
            scope: self.store.searchable_scope(document_ids),
            tokens: parsed.tokens,
            patterns: parsed.patterns,
            query_embedding: None,
            top_k: self.channel_top_k,
        };

        let (semantic, lexical, relation) = tokio::join!(
            self.run_channel(ChannelKind::Semantic, self.semantic_branch(&base, query)),
            self.run_channel(ChannelKind::Lexical, self.lexical.retrieve(&base)),
            self.run_channel(ChannelKind::Relation, self.relation.retrieve(&base)),
        );

        if semantic.is_err() && lexical.is_err() && relation.is_err() {
            return Err(AppError::AllChannelsFailed);
        }

        let lists = ChannelLists {
            semantic: semantic.unwrap_or_default(),
            lexical: lexical.unwrap_or_default(),
            relation: relation.unwrap_or_default(),
        };
        let fused = fusion::fuse(&lists);
        let reranked = self.rerank.apply(query, fused).await;
        let (results, total_results) = self.assembler.assemble(query, &reranked, limit);

        let search_time = started.elapsed().as_secs_f64();
        record_search(search_time, results.len());
        debug!(
            total_results,
            returned = results.len(),
            search_time,
            "search complete"
        );

        Ok(SearchOutcome {
            results,
            total_results,
            search_time,
        })
    }

    /// The semantic branch embeds the query before retrieving, so the
    /// embedding call sits inside this branch's timeout like the retrieval
    /// itself. An embedding failure degrades this branch only.
    async fn semantic_branch(
        &self,
        base: &RetrievalRequest,
        query: &str,
    ) -> Result<Vec<ChannelHit>> {
        let embedding = self.embedder.embed(query).await?;
        let mut request = base.clone();
        request.query_embedding = Some(embedding);
        self.semantic.retrieve(&request).await
    }

    /// Run one channel's work under the per-channel timeout, recording
    /// metrics and demoting failure to a logged degradation.
    async fn run_channel<F>(&self, channel: ChannelKind, work: F) -> Result<Vec<ChannelHit>>
    where
        F: std::future::Future<Output = Result<Vec<ChannelHit>>>,
    {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.channel_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::ChannelTimeout {
                channel,
                timeout_ms: self.channel_timeout.as_millis() as u64,
            }),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(hits) => {
                record_channel(channel.as_str(), elapsed, true);
                debug!(channel = channel.as_str(), hits = hits.len(), "channel done");
            }
            Err(error) => {
                record_channel(channel.as_str(), elapsed, false);
                warn!(%error, channel = channel.as_str(), "retrieval channel degraded");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::embeddings::MockEmbedder;
    use quarry_common::store::{ChunkType, Document, DocumentStatus, NewChunk, NewTriple};

    const DIMENSION: usize = 64;

    struct FailingEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "provider down".to_string(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "provider down".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            DIMENSION
        }
    }

    struct SlowEmbedder;

    #[async_trait::async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![0.0; DIMENSION])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(texts.iter().map(|_| vec![0.0; DIMENSION]).collect())
        }

        fn model_name(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            DIMENSION
        }
    }

    struct StuckRetriever(ChannelKind);

    #[async_trait::async_trait]
    impl Retriever for StuckRetriever {
        async fn retrieve(&self, _request: &RetrievalRequest) -> Result<Vec<ChannelHit>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        fn channel(&self) -> ChannelKind {
            self.0
        }
    }

    async fn seed_corpus(store: &ChunkStore, vectors: &VectorIndex, embedder: &dyn Embedder) -> Uuid {
        let doc = store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed));

        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                document_id: doc,
                page_num: 1,
                chunk_index: 0,
                chunk_type: ChunkType::Parent,
                parent_chunk_id: None,
                chunk_text: "Financial summary: revenue increased 20% year over year, driven by \
                             strong subscription growth across all regions."
                    .to_string(),
                token_count: 18,
            }])
            .unwrap();

        let texts = [
            "revenue increased 20% year over year",
            "subscription growth was strong across regions",
            "the weather in antarctica remained cold",
        ];
        let mut revenue_chunk = Uuid::nil();
        for (i, text) in texts.iter().enumerate() {
            let ids = store
                .insert_chunks(vec![NewChunk {
                    document_id: doc,
                    page_num: i as u32 + 1,
                    chunk_index: 1,
                    chunk_type: ChunkType::Child,
                    parent_chunk_id: if i == 0 { Some(parent_ids[0]) } else { None },
                    chunk_text: text.to_string(),
                    token_count: 8,
                }])
                .unwrap();
            let embedding = embedder.embed(text).await.unwrap();
            vectors.upsert(ids[0], embedding).unwrap();
            store.mark_embedded(ids[0]).unwrap();
            if i == 0 {
                revenue_chunk = ids[0];
            }
        }

        store
            .insert_triples(vec![NewTriple {
                chunk_id: revenue_chunk,
                subject: "revenue".to_string(),
                predicate: "increased".to_string(),
                object: "20%".to_string(),
            }])
            .unwrap();
        doc
    }

    fn pipeline(
        store: Arc<ChunkStore>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> SearchPipeline {
        SearchPipeline::new(
            store,
            vectors,
            embedder,
            &SearchConfig::default(),
            &RerankConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_end_to_end() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIMENSION));
        seed_corpus(&store, &vectors, embedder.as_ref()).await;

        let pipeline = pipeline(store, vectors, embedder);
        let outcome = pipeline
            .search("revenue increased 20%", None, 20)
            .await
            .unwrap();

        assert!(!outcome.results.is_empty());
        // The revenue chunk matches all three channels and must lead
        assert!(outcome.results[0].snippet.contains("revenue increased"));
        assert!(outcome.results[0].scores.fusion >= outcome.results.last().unwrap().scores.fusion);
        assert!(!outcome.results[0].matched_triples.is_empty());
    }

    #[tokio::test]
    async fn test_empty_corpus_yields_empty_results_not_error() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIMENSION));

        let pipeline = pipeline(store, vectors, embedder);
        let outcome = pipeline.search("anything at all", None, 20).await.unwrap();

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total_results, 0);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIMENSION));

        let pipeline = pipeline(store, vectors, embedder);
        let error = pipeline.search("   ", None, 20).await.unwrap_err();
        assert!(matches!(error, AppError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_other_channels() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let seeder = MockEmbedder::new(DIMENSION);
        seed_corpus(&store, &vectors, &seeder).await;

        let pipeline = pipeline(store, vectors, Arc::new(FailingEmbedder));
        let outcome = pipeline
            .search("revenue increased 20%", None, 20)
            .await
            .unwrap();

        // Lexical and relation channels still surface the match
        assert!(!outcome.results.is_empty());
        assert_eq!(outcome.results[0].scores.semantic, 0.0);
    }

    #[tokio::test]
    async fn test_slow_embedder_bounded_by_channel_timeout() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let seeder = MockEmbedder::new(DIMENSION);
        seed_corpus(&store, &vectors, &seeder).await;

        let mut pipeline = pipeline(store, vectors, Arc::new(SlowEmbedder));
        pipeline.channel_timeout = Duration::from_millis(100);

        let started = Instant::now();
        let outcome = pipeline
            .search("revenue increased 20%", None, 20)
            .await
            .unwrap();

        // The embed call counts against the semantic channel's timeout,
        // so the whole query returns within the channel bound.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!outcome.results.is_empty());
        assert_eq!(outcome.results[0].scores.semantic, 0.0);
    }

    #[tokio::test]
    async fn test_all_channels_failing_is_an_error() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let mut pipeline = pipeline(store, vectors, Arc::new(FailingEmbedder));
        pipeline.lexical = Arc::new(StuckRetriever(ChannelKind::Lexical));
        pipeline.relation = Arc::new(StuckRetriever(ChannelKind::Relation));
        pipeline.channel_timeout = Duration::from_millis(50);

        let error = pipeline.search("some query", None, 20).await.unwrap_err();
        assert!(matches!(error, AppError::AllChannelsFailed));
    }

    #[tokio::test]
    async fn test_scope_filters_documents() {
        let store = Arc::new(ChunkStore::new());
        let vectors = Arc::new(VectorIndex::new(DIMENSION, "mock"));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(DIMENSION));
        seed_corpus(&store, &vectors, embedder.as_ref()).await;
        let other = Uuid::new_v4();

        let pipeline = pipeline(store, vectors, embedder);
        let outcome = pipeline
            .search("revenue increased 20%", Some(&[other]), 20)
            .await
            .unwrap();

        assert!(outcome.results.is_empty());
    }
}
