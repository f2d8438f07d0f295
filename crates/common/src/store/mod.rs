//! Hierarchical chunk store and triple store
//!
//! Holds the parent/child chunk records and extracted relations that the
//! retrieval channels read. Persistence is out of scope; the store is the
//! minimal in-memory schema retrieval needs, guarded by a read-write lock.
//! Retrieval is read-only, so concurrent queries share the store without
//! further coordination.
//!
//! Invariants enforced at write time:
//! - `(document_id, page_num, chunk_index)` is unique across chunks
//! - `parent_chunk_id` is set only on CHILD chunks and must reference a
//!   PARENT chunk of the same document
//! - only CHILD chunks can be marked embedded
//! - triples are cascade-deleted with their chunk
//!
//! Search keys are derived by the pure functions in [`keys`] when a record
//! is written, never implicitly.

pub mod keys;
pub mod vector;

pub use vector::VectorIndex;

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

/// Document ingestion status; only `Completed` documents are searchable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Chunk hierarchy type for the parent-child chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkType {
    /// Large context chunks used for display and reranking
    Parent,
    /// Small chunks that carry embeddings and drive semantic search
    Child,
}

/// A searchable document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub status: DocumentStatus,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, page_count: u32, status: DocumentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status,
            page_count,
            created_at: Utc::now(),
        }
    }
}

/// A stored chunk with its derived lexical key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page_num: u32,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    pub parent_chunk_id: Option<Uuid>,
    pub chunk_text: String,
    pub token_count: u32,
    pub embedded: bool,
    /// Derived at write time by [`keys::lexical_key`]
    pub lexical_key: Vec<String>,
}

/// Chunk insertion payload; id and derived fields are assigned by the store
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: Uuid,
    pub page_num: u32,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    pub parent_chunk_id: Option<Uuid>,
    pub chunk_text: String,
    pub token_count: u32,
}

/// An extracted (subject, predicate, object) relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Uuid,
    pub page_num: u32,
    pub chunk_index: u32,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Derived at write time by [`keys::relation_key`]
    pub search_key: Vec<String>,
}

/// Triple insertion payload; location fields are copied from the chunk
#[derive(Debug, Clone)]
pub struct NewTriple {
    pub chunk_id: Uuid,
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

#[derive(Default)]
struct StoreInner {
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Chunk>,
    /// Uniqueness index over (document_id, page_num, chunk_index)
    positions: HashSet<(Uuid, u32, u32)>,
    triples: HashMap<Uuid, Triple>,
    triples_by_chunk: HashMap<Uuid, Vec<Uuid>>,
}

/// In-memory chunk and triple store
#[derive(Default)]
pub struct ChunkStore {
    inner: RwLock<StoreInner>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn insert_document(&self, document: Document) -> Uuid {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let id = document.id;
        inner.documents.insert(id, document);
        id
    }

    pub fn document(&self, id: Uuid) -> Option<Document> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.documents.get(&id).cloned()
    }

    pub fn set_document_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let doc = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
        doc.status = status;
        Ok(())
    }

    /// Resolve the set of searchable document ids: completed documents,
    /// optionally intersected with an explicit scope. Unknown or
    /// not-yet-completed ids simply drop out; an empty scope means there is
    /// nothing to search, which is not an error.
    pub fn searchable_scope(&self, requested: Option<&[Uuid]>) -> HashSet<Uuid> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .documents
            .values()
            .filter(|d| d.status == DocumentStatus::Completed)
            .map(|d| d.id)
            .filter(|id| requested.map_or(true, |ids| ids.contains(id)))
            .collect()
    }

    /// Delete a document with all of its chunks and triples. Returns the
    /// ids of removed chunks so the caller can purge the vector index.
    pub fn delete_document(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.documents.remove(&id).is_none() {
            return Err(AppError::DocumentNotFound { id: id.to_string() });
        }

        let chunk_ids: Vec<Uuid> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == id)
            .map(|c| c.id)
            .collect();

        for chunk_id in &chunk_ids {
            Self::remove_chunk_locked(&mut inner, *chunk_id);
        }

        Ok(chunk_ids)
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// Bulk-insert chunks, enforcing hierarchy and uniqueness invariants.
    /// Parents may be referenced by later entries of the same batch.
    pub fn insert_chunks(&self, batch: Vec<NewChunk>) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let mut ids = Vec::with_capacity(batch.len());

        for new in batch {
            if !inner.documents.contains_key(&new.document_id) {
                return Err(AppError::DocumentNotFound {
                    id: new.document_id.to_string(),
                });
            }

            let position = (new.document_id, new.page_num, new.chunk_index);
            if inner.positions.contains(&position) {
                return Err(AppError::InvalidChunk {
                    message: format!(
                        "duplicate chunk position (doc={}, page={}, index={})",
                        new.document_id, new.page_num, new.chunk_index
                    ),
                });
            }

            if let Some(parent_id) = new.parent_chunk_id {
                if new.chunk_type != ChunkType::Child {
                    return Err(AppError::InvalidChunk {
                        message: "parent_chunk_id is only valid on CHILD chunks".to_string(),
                    });
                }
                let parent = inner.chunks.get(&parent_id).ok_or_else(|| {
                    AppError::InvalidChunk {
                        message: format!("parent chunk {} does not exist", parent_id),
                    }
                })?;
                if parent.chunk_type != ChunkType::Parent {
                    return Err(AppError::InvalidChunk {
                        message: format!("chunk {} is not a PARENT chunk", parent_id),
                    });
                }
                if parent.document_id != new.document_id {
                    return Err(AppError::InvalidChunk {
                        message: "parent chunk belongs to a different document".to_string(),
                    });
                }
            }

            let chunk = Chunk {
                id: Uuid::new_v4(),
                document_id: new.document_id,
                page_num: new.page_num,
                chunk_index: new.chunk_index,
                chunk_type: new.chunk_type,
                parent_chunk_id: new.parent_chunk_id,
                lexical_key: keys::lexical_key(&new.chunk_text),
                chunk_text: new.chunk_text,
                token_count: new.token_count,
                embedded: false,
            };

            inner.positions.insert(position);
            ids.push(chunk.id);
            inner.chunks.insert(chunk.id, chunk);
        }

        Ok(ids)
    }

    pub fn chunk(&self, id: Uuid) -> Option<Chunk> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.chunks.get(&id).cloned()
    }

    /// Resolve a chunk's parent, if it has one and the parent still
    /// exists. A dangling parent reference yields `None`, never an error;
    /// callers fall back to the child's own text.
    pub fn parent_of(&self, chunk: &Chunk) -> Option<Chunk> {
        let parent_id = chunk.parent_chunk_id?;
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .chunks
            .get(&parent_id)
            .filter(|p| p.chunk_type == ChunkType::Parent)
            .cloned()
    }

    /// Flip the embedded flag once vectorization succeeds. Only CHILD
    /// chunks carry embeddings.
    pub fn mark_embedded(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let chunk = inner
            .chunks
            .get_mut(&id)
            .ok_or_else(|| AppError::ChunkNotFound { id: id.to_string() })?;
        if chunk.chunk_type != ChunkType::Child {
            return Err(AppError::InvalidChunk {
                message: "only CHILD chunks can be embedded".to_string(),
            });
        }
        chunk.embedded = true;
        Ok(())
    }

    /// Visit every chunk of the scoped documents without cloning
    pub fn visit_chunks(&self, scope: &HashSet<Uuid>, mut f: impl FnMut(&Chunk)) {
        let inner = self.inner.read().expect("store lock poisoned");
        for chunk in inner.chunks.values() {
            if scope.contains(&chunk.document_id) {
                f(chunk);
            }
        }
    }

    /// Delete a single chunk and its triples. Child chunks of a deleted
    /// parent are kept; their parent reference dangles and resolves to
    /// `None` on lookup.
    pub fn delete_chunk(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if !inner.chunks.contains_key(&id) {
            return Err(AppError::ChunkNotFound { id: id.to_string() });
        }
        Self::remove_chunk_locked(&mut inner, id);
        Ok(())
    }

    fn remove_chunk_locked(inner: &mut StoreInner, id: Uuid) {
        if let Some(chunk) = inner.chunks.remove(&id) {
            inner
                .positions
                .remove(&(chunk.document_id, chunk.page_num, chunk.chunk_index));
        }
        if let Some(triple_ids) = inner.triples_by_chunk.remove(&id) {
            for tid in triple_ids {
                inner.triples.remove(&tid);
            }
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").chunks.len()
    }

    // ------------------------------------------------------------------
    // Triples
    // ------------------------------------------------------------------

    /// Bulk-insert triples; page and index location is copied from the
    /// owning chunk, and the relation search key is derived here.
    pub fn insert_triples(&self, batch: Vec<NewTriple>) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let mut ids = Vec::with_capacity(batch.len());

        for new in batch {
            let chunk = inner
                .chunks
                .get(&new.chunk_id)
                .ok_or_else(|| AppError::ChunkNotFound {
                    id: new.chunk_id.to_string(),
                })?;

            let triple = Triple {
                id: Uuid::new_v4(),
                document_id: chunk.document_id,
                chunk_id: chunk.id,
                page_num: chunk.page_num,
                chunk_index: chunk.chunk_index,
                search_key: keys::relation_key(&new.subject, &new.predicate, &new.object),
                subject: new.subject,
                predicate: new.predicate,
                object: new.object,
            };

            inner
                .triples_by_chunk
                .entry(triple.chunk_id)
                .or_default()
                .push(triple.id);
            ids.push(triple.id);
            inner.triples.insert(triple.id, triple);
        }

        Ok(ids)
    }

    pub fn triples_for_chunk(&self, chunk_id: Uuid) -> Vec<Triple> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .triples_by_chunk
            .get(&chunk_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.triples.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visit every triple of the scoped documents without cloning
    pub fn visit_triples(&self, scope: &HashSet<Uuid>, mut f: impl FnMut(&Triple)) {
        let inner = self.inner.read().expect("store lock poisoned");
        for triple in inner.triples.values() {
            if scope.contains(&triple.document_id) {
                f(triple);
            }
        }
    }

    pub fn triple_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").triples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_doc(store: &ChunkStore) -> Uuid {
        store.insert_document(Document::new("report.pdf", 10, DocumentStatus::Completed))
    }

    fn child(document_id: Uuid, page: u32, index: u32, text: &str) -> NewChunk {
        NewChunk {
            document_id,
            page_num: page,
            chunk_index: index,
            chunk_type: ChunkType::Child,
            parent_chunk_id: None,
            chunk_text: text.to_string(),
            token_count: text.split_whitespace().count() as u32,
        }
    }

    #[test]
    fn test_insert_derives_lexical_key() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let ids = store
            .insert_chunks(vec![child(doc, 1, 0, "Revenue increased 20% this year")])
            .unwrap();
        let chunk = store.chunk(ids[0]).unwrap();
        assert!(chunk.lexical_key.contains(&"revenue".to_string()));
        assert!(!chunk.embedded);
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        store.insert_chunks(vec![child(doc, 1, 0, "first")]).unwrap();
        let err = store
            .insert_chunks(vec![child(doc, 1, 0, "second")])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidChunk { .. }));
    }

    #[test]
    fn test_parent_must_be_parent_type_and_same_document() {
        let store = ChunkStore::new();
        let doc_a = completed_doc(&store);
        let doc_b = completed_doc(&store);

        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                chunk_type: ChunkType::Parent,
                ..child(doc_a, 1, 0, "parent context text")
            }])
            .unwrap();

        // Child in another document may not reference this parent
        let err = store
            .insert_chunks(vec![NewChunk {
                parent_chunk_id: Some(parent_ids[0]),
                ..child(doc_b, 1, 0, "stray child")
            }])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidChunk { .. }));

        // Same-document child is fine
        store
            .insert_chunks(vec![NewChunk {
                parent_chunk_id: Some(parent_ids[0]),
                ..child(doc_a, 1, 1, "proper child")
            }])
            .unwrap();

        // A child may not be used as a parent
        let child_ids = store.insert_chunks(vec![child(doc_a, 2, 0, "leaf")]).unwrap();
        let err = store
            .insert_chunks(vec![NewChunk {
                parent_chunk_id: Some(child_ids[0]),
                ..child(doc_a, 2, 1, "grandchild")
            }])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidChunk { .. }));
    }

    #[test]
    fn test_parent_on_parent_chunk_rejected() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                chunk_type: ChunkType::Parent,
                ..child(doc, 1, 0, "outer")
            }])
            .unwrap();
        let err = store
            .insert_chunks(vec![NewChunk {
                chunk_type: ChunkType::Parent,
                parent_chunk_id: Some(parent_ids[0]),
                ..child(doc, 1, 1, "nested parent")
            }])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidChunk { .. }));
    }

    #[test]
    fn test_mark_embedded_only_on_children() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                chunk_type: ChunkType::Parent,
                ..child(doc, 1, 0, "context")
            }])
            .unwrap();
        assert!(store.mark_embedded(parent_ids[0]).is_err());

        let child_ids = store.insert_chunks(vec![child(doc, 1, 1, "leaf")]).unwrap();
        store.mark_embedded(child_ids[0]).unwrap();
        assert!(store.chunk(child_ids[0]).unwrap().embedded);
    }

    #[test]
    fn test_searchable_scope_excludes_incomplete() {
        let store = ChunkStore::new();
        let done = completed_doc(&store);
        let pending =
            store.insert_document(Document::new("wip.pdf", 3, DocumentStatus::Processing));

        let scope = store.searchable_scope(None);
        assert!(scope.contains(&done));
        assert!(!scope.contains(&pending));

        let scoped = store.searchable_scope(Some(&[pending]));
        assert!(scoped.is_empty());
    }

    #[test]
    fn test_triples_cascade_with_chunk() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let ids = store
            .insert_chunks(vec![child(doc, 4, 0, "Revenue increased 20% in 2024")])
            .unwrap();
        store
            .insert_triples(vec![NewTriple {
                chunk_id: ids[0],
                subject: "revenue".to_string(),
                predicate: "increased".to_string(),
                object: "20%".to_string(),
            }])
            .unwrap();
        assert_eq!(store.triple_count(), 1);

        let triple = &store.triples_for_chunk(ids[0])[0];
        assert_eq!(triple.page_num, 4);
        assert_eq!(triple.document_id, doc);

        store.delete_chunk(ids[0]).unwrap();
        assert_eq!(store.triple_count(), 0);
    }

    #[test]
    fn test_deleted_parent_resolves_to_none() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let parent_ids = store
            .insert_chunks(vec![NewChunk {
                chunk_type: ChunkType::Parent,
                ..child(doc, 1, 0, "surrounding context")
            }])
            .unwrap();
        let child_ids = store
            .insert_chunks(vec![NewChunk {
                parent_chunk_id: Some(parent_ids[0]),
                ..child(doc, 1, 1, "precise match")
            }])
            .unwrap();

        store.delete_chunk(parent_ids[0]).unwrap();

        let orphan = store.chunk(child_ids[0]).unwrap();
        assert!(orphan.parent_chunk_id.is_some());
        assert!(store.parent_of(&orphan).is_none());
    }

    #[test]
    fn test_delete_document_cascades() {
        let store = ChunkStore::new();
        let doc = completed_doc(&store);
        let ids = store
            .insert_chunks(vec![child(doc, 1, 0, "alpha"), child(doc, 1, 1, "beta")])
            .unwrap();
        store
            .insert_triples(vec![NewTriple {
                chunk_id: ids[0],
                subject: "a".into(),
                predicate: "b".into(),
                object: "c".into(),
            }])
            .unwrap();

        let removed = store.delete_document(doc).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.chunk_count(), 0);
        assert_eq!(store.triple_count(), 0);
        assert!(store.document(doc).is_none());
    }
}
