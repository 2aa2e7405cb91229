//! Document-scoped vector similarity search.
//!
//! The index stores one entry per chunk, keyed by document so a query never
//! crosses paper boundaries. Ranking is cosine similarity descending with
//! chunk ordinal ascending as the tie-break, which keeps result order fully
//! deterministic for a fixed corpus and query.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::models::{ChunkId, DocumentId};

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    #[diagnostic(
        code(paperweave::index::dimension),
        help("All vectors in one index must share the embedding dimension.")
    )]
    Dimension { expected: usize, actual: usize },

    #[error("index backend error: {0}")]
    #[diagnostic(code(paperweave::index::backend))]
    Backend(String),
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: ChunkId,
    pub ordinal: usize,
    pub similarity: f32,
}

/// Vector store abstraction over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces the vector stored under `chunk_id`.
    async fn upsert(
        &self,
        document_id: DocumentId,
        chunk_id: ChunkId,
        ordinal: usize,
        vector: Vec<f32>,
    ) -> Result<(), IndexError>;

    /// Removes every vector belonging to `document_id`.
    async fn delete_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError>;

    /// Top-`k` entries of one document ranked by cosine similarity to
    /// `query`, ties broken by ascending ordinal. Fewer than `k` results
    /// is normal for small corpora.
    async fn query(
        &self,
        document_id: DocumentId,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;
}

#[derive(Debug, Clone)]
struct Entry {
    chunk_id: ChunkId,
    ordinal: usize,
    vector: Vec<f32>,
}

/// In-memory reference index.
///
/// Production deployments swap in a server-side vector store behind the
/// same trait; this backend keeps the ranking semantics authoritative and
/// testable without one.
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: RwLock<FxHashMap<DocumentId, Vec<Entry>>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        document_id: DocumentId,
        chunk_id: ChunkId,
        ordinal: usize,
        vector: Vec<f32>,
    ) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;
        let mut entries = self.entries.write();
        let bucket = entries.entry(document_id).or_default();
        match bucket.iter_mut().find(|e| e.chunk_id == chunk_id) {
            Some(existing) => {
                existing.ordinal = ordinal;
                existing.vector = vector;
            }
            None => bucket.push(Entry {
                chunk_id,
                ordinal,
                vector,
            }),
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError> {
        let removed = self
            .entries
            .write()
            .remove(&document_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0);
        Ok(removed)
    }

    async fn query(
        &self,
        document_id: DocumentId,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.check_dimension(query)?;
        let entries = self.entries.read();
        let Some(bucket) = entries.get(&document_id) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<IndexHit> = bucket
            .iter()
            .map(|e| IndexHit {
                chunk_id: e.chunk_id,
                ordinal: e.ordinal,
                similarity: cosine_similarity(query, &e.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.ordinal.cmp(&b.ordinal))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn query_ranks_by_similarity_then_ordinal() {
        let index = InMemoryVectorIndex::new(2);
        let doc = Uuid::new_v4();
        let aligned_late = Uuid::new_v4();
        let aligned_early = Uuid::new_v4();
        let orthogonal = Uuid::new_v4();

        // Two identical vectors at different ordinals plus one orthogonal.
        index.upsert(doc, aligned_late, 5, vec![1.0, 0.0]).await.unwrap();
        index.upsert(doc, aligned_early, 2, vec![1.0, 0.0]).await.unwrap();
        index.upsert(doc, orthogonal, 0, vec![0.0, 1.0]).await.unwrap();

        let hits = index.query(doc, &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(
            hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(),
            vec![aligned_early, aligned_late, orthogonal]
        );
        assert!(hits[0].similarity > hits[2].similarity);
    }

    #[tokio::test]
    async fn queries_never_cross_documents() {
        let index = InMemoryVectorIndex::new(2);
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        index.upsert(doc_a, Uuid::new_v4(), 0, vec![1.0, 0.0]).await.unwrap();
        index.upsert(doc_b, Uuid::new_v4(), 0, vec![1.0, 0.0]).await.unwrap();

        let hits = index.query(doc_a, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_vector() {
        let index = InMemoryVectorIndex::new(2);
        let doc = Uuid::new_v4();
        let chunk = Uuid::new_v4();
        index.upsert(doc, chunk, 0, vec![1.0, 0.0]).await.unwrap();
        index.upsert(doc, chunk, 0, vec![0.0, 1.0]).await.unwrap();

        let hits = index.query(doc, &[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn delete_by_document_clears_the_bucket() {
        let index = InMemoryVectorIndex::new(2);
        let doc = Uuid::new_v4();
        index.upsert(doc, Uuid::new_v4(), 0, vec![1.0, 0.0]).await.unwrap();
        index.upsert(doc, Uuid::new_v4(), 1, vec![0.0, 1.0]).await.unwrap();
        assert_eq!(index.delete_by_document(doc).await.unwrap(), 2);
        assert!(index.query(doc, &[1.0, 0.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let index = InMemoryVectorIndex::new(3);
        let err = index
            .upsert(Uuid::new_v4(), Uuid::new_v4(), 0, vec![1.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Dimension { expected: 3, actual: 2 }));
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
