//! HTTP handlers for the search service

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::assemble::SearchResult;
use crate::AppState;
use quarry_common::errors::{AppError, Result};
use quarry_common::store::{ChunkType, Document, DocumentStatus, NewChunk, NewTriple};

/// Search request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    /// Restrict the search to these documents
    #[serde(default)]
    pub document_ids: Option<Vec<Uuid>>,

    /// Maximum results to return
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub search_time: f64,
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    // Serving is blocked while the index and embedder disagree on dimension
    ensure_dimensions_match(&state)?;

    let limit = request
        .limit
        .unwrap_or(state.config.search.default_limit)
        .clamp(1, state.config.search.max_limit);

    let outcome = state
        .pipeline
        .search(&request.query, request.document_ids.as_deref(), limit)
        .await?;

    Ok(Json(SearchResponse {
        results: outcome.results,
        total_results: outcome.total_results,
        search_time: outcome.search_time,
    }))
}

/// Document registration request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 512))]
    pub name: String,
    pub page_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentResponse {
    pub id: Uuid,
    pub name: String,
    pub status: DocumentStatus,
}

pub async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("name".to_string()),
    })?;

    let document = Document::new(request.name, request.page_count, DocumentStatus::Completed);
    let name = document.name.clone();
    let id = state.store.insert_document(document);
    info!(document_id = %id, "document registered");

    Ok((
        StatusCode::CREATED,
        Json(CreateDocumentResponse {
            id,
            name,
            status: DocumentStatus::Completed,
        }),
    ))
}

/// One chunk in a bulk ingest batch
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestChunk {
    pub page_number: u32,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,

    /// Batch-relative index of this chunk's PARENT, for CHILD chunks
    pub parent_index: Option<usize>,

    pub text: String,
    pub token_count: Option<u32>,

    /// Relations extracted from this chunk
    #[serde(default)]
    pub triples: Vec<IngestTriple>,
}

#[derive(Debug, Deserialize)]
pub struct IngestTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestChunksRequest {
    pub chunks: Vec<IngestChunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestChunksResponse {
    pub chunk_ids: Vec<Uuid>,
    pub embedded: usize,
    pub triples: usize,
}

/// Bulk-insert chunks for a document, embed the CHILD chunks, and store
/// any extracted triples. Parent references are batch-relative so a
/// parent and its children can land in one request.
pub async fn ingest_chunks(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Json(request): Json<IngestChunksRequest>,
) -> Result<(StatusCode, Json<IngestChunksResponse>)> {
    if state.store.document(document_id).is_none() {
        return Err(AppError::DocumentNotFound {
            id: document_id.to_string(),
        });
    }
    if request.chunks.is_empty() {
        return Err(AppError::InvalidChunk {
            message: "chunk batch is empty".to_string(),
        });
    }

    // Insert one at a time so batch-relative parent references resolve
    // against already-assigned ids
    let mut chunk_ids: Vec<Uuid> = Vec::with_capacity(request.chunks.len());
    for (position, chunk) in request.chunks.iter().enumerate() {
        let parent_chunk_id = match chunk.parent_index {
            Some(parent_index) => {
                if parent_index >= position {
                    return Err(AppError::InvalidChunk {
                        message: format!(
                            "chunk {} references parent index {} which does not precede it",
                            position, parent_index
                        ),
                    });
                }
                Some(chunk_ids[parent_index])
            }
            None => None,
        };

        let token_count = chunk
            .token_count
            .unwrap_or_else(|| chunk.text.split_whitespace().count() as u32);

        let ids = state.store.insert_chunks(vec![NewChunk {
            document_id,
            page_num: chunk.page_number,
            chunk_index: chunk.chunk_index,
            chunk_type: chunk.chunk_type,
            parent_chunk_id,
            chunk_text: chunk.text.clone(),
            token_count,
        }])?;
        chunk_ids.push(ids[0]);
    }

    // Embed CHILD chunks in one provider call
    let children: Vec<(Uuid, String)> = request
        .chunks
        .iter()
        .zip(&chunk_ids)
        .filter(|(chunk, _)| chunk.chunk_type == ChunkType::Child)
        .map(|(chunk, id)| (*id, chunk.text.clone()))
        .collect();

    let mut embedded = 0;
    if !children.is_empty() {
        let texts: Vec<String> = children.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = state.embedder.embed_batch(&texts).await?;
        for ((id, _), embedding) in children.iter().zip(embeddings) {
            state.vectors.upsert(*id, embedding)?;
            state.store.mark_embedded(*id)?;
            embedded += 1;
        }
    }

    let mut triples = 0;
    for (chunk, id) in request.chunks.iter().zip(&chunk_ids) {
        if chunk.triples.is_empty() {
            continue;
        }
        let batch: Vec<NewTriple> = chunk
            .triples
            .iter()
            .map(|t| NewTriple {
                chunk_id: *id,
                subject: t.subject.clone(),
                predicate: t.predicate.clone(),
                object: t.object.clone(),
            })
            .collect();
        triples += batch.len();
        state.store.insert_triples(batch)?;
    }

    info!(
        document_id = %document_id,
        chunks = chunk_ids.len(),
        embedded,
        triples,
        "chunks ingested"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestChunksResponse {
            chunk_ids,
            embedded,
            triples,
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDocumentResponse {
    pub id: Uuid,
    pub deleted_chunks: usize,
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DeleteDocumentResponse>> {
    let removed = state.store.delete_document(document_id)?;
    state.vectors.remove_many(&removed);
    info!(document_id = %document_id, chunks = removed.len(), "document deleted");

    Ok(Json(DeleteDocumentResponse {
        id: document_id,
        deleted_chunks: removed.len(),
    }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: quarry_common::VERSION,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexHealthResponse {
    pub status: &'static str,
    pub index_dimension: usize,
    pub embedder_dimension: usize,
    pub model: String,
    pub vector_count: usize,
}

/// Embedding-dimension precondition check. A mismatch between the vector
/// index and the active embedder makes every semantic score meaningless,
/// so it is reported here and blocks `/v1/search` entirely.
pub async fn index_health(State(state): State<AppState>) -> Result<Json<IndexHealthResponse>> {
    ensure_dimensions_match(&state)?;

    Ok(Json(IndexHealthResponse {
        status: "ok",
        index_dimension: state.vectors.dimension(),
        embedder_dimension: state.embedder.dimension(),
        model: state.embedder.model_name().to_string(),
        vector_count: state.vectors.len(),
    }))
}

fn ensure_dimensions_match(state: &AppState) -> Result<()> {
    let expected = state.vectors.dimension();
    let actual = state.embedder.dimension();
    if expected != actual {
        return Err(AppError::EmbeddingDimensionMismatch { expected, actual });
    }
    Ok(())
}
