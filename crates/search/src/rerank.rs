//! Optional cross-encoder reranking stage
//!
//! Refines the order of the top fused candidates by scoring each
//! (query, chunk text) pair against an external reranker service. The
//! stage is strictly order-only: fusion scores and the tail beyond the
//! reranked window are left untouched, and any failure or timeout
//! degrades to the fused order.

use crate::retrieval::fusion::FusedChunk;
use quarry_common::errors::{AppError, Result};
use quarry_common::metrics::record_rerank_skipped;
use quarry_common::store::ChunkStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum characters of chunk text sent per rerank candidate
const MAX_CANDIDATE_CHARS: usize = 512;

/// Hard cap on the rerank window, whatever the configuration says
pub const MAX_RERANK_TOP_N: usize = 50;

/// Scores (query, text) pairs; higher means more relevant
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// Return one score per text, in input order
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Reranker backed by an HTTP scoring service
pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
}

impl HttpReranker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&RerankRequest { query, texts })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::RerankerUnavailable {
                message: format!("reranker returned status {}", response.status()),
            });
        }

        let body: RerankResponse = response.json().await?;
        if body.scores.len() != texts.len() {
            return Err(AppError::RerankerUnavailable {
                message: format!(
                    "reranker returned {} scores for {} texts",
                    body.scores.len(),
                    texts.len()
                ),
            });
        }
        Ok(body.scores)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Applies the reranker to the head of a fused ranking, degrading to a
/// pass-through when no reranker is configured or the call fails.
pub struct RerankAdapter {
    reranker: Option<Arc<dyn Reranker>>,
    store: Arc<ChunkStore>,
    top_n: usize,
    timeout: Duration,
}

impl RerankAdapter {
    pub fn new(
        reranker: Option<Arc<dyn Reranker>>,
        store: Arc<ChunkStore>,
        top_n: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            reranker,
            store,
            top_n: top_n.min(MAX_RERANK_TOP_N),
            timeout,
        }
    }

    /// Reorder the top `top_n` fused chunks by reranker score; the
    /// remainder keeps its fused order and is appended unchanged.
    pub async fn apply(&self, query: &str, fused: Vec<FusedChunk>) -> Vec<FusedChunk> {
        let reranker = match &self.reranker {
            Some(r) => r,
            None => return fused,
        };
        if fused.len() < 2 {
            return fused;
        }

        let window = self.top_n.min(fused.len());
        let texts: Vec<String> = fused[..window]
            .iter()
            .map(|chunk| self.candidate_text(chunk))
            .collect();

        let scores = match tokio::time::timeout(self.timeout, reranker.score(query, &texts)).await
        {
            Ok(Ok(scores)) if scores.len() == window => scores,
            Ok(Ok(scores)) => {
                warn!(
                    expected = window,
                    actual = scores.len(),
                    "reranker score count mismatch, keeping fused order"
                );
                record_rerank_skipped("score_mismatch");
                return fused;
            }
            Ok(Err(error)) => {
                warn!(%error, reranker = reranker.name(), "rerank failed, keeping fused order");
                record_rerank_skipped("error");
                return fused;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "rerank timed out, keeping fused order"
                );
                record_rerank_skipped("timeout");
                return fused;
            }
        };

        debug!(window, "applying rerank order");

        let mut fused = fused;
        let tail = fused.split_off(window);
        let mut head: Vec<(FusedChunk, f32)> = fused.into_iter().zip(scores).collect();
        head.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.page_num.cmp(&b.page_num))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });

        head.into_iter()
            .map(|(chunk, _)| chunk)
            .chain(tail)
            .collect()
    }

    /// Text sent to the reranker: the parent chunk's text when the chunk
    /// has a surviving parent, the chunk's own text otherwise.
    fn candidate_text(&self, fused: &FusedChunk) -> String {
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

        match text.char_indices().nth(MAX_CANDIDATE_CHARS) {
            Some((byte_idx, _)) => text[..byte_idx].to_string(),
            None => text,
        }
    }
}
