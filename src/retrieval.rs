//! Query construction and grounded context retrieval.
//!
//! The query for a section is assembled from document metadata in a fixed
//! order, so retrieval is reproducible: the same document, corpus and
//! section always produce the same ranked context.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::embedding::{EmbedError, SharedEmbedder};
use crate::index::{IndexError, VectorIndex};
use crate::models::{Chunk, Document};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("no chunk cleared the similarity floor {min_similarity} for section '{section}'")]
    #[diagnostic(
        code(paperweave::retrieval::insufficient_grounding),
        help("Upload more relevant reference material or lower the similarity floor.")
    )]
    InsufficientGrounding {
        section: String,
        min_similarity: f32,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

/// A chunk that cleared the similarity floor, in rank order.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Retrieves ranked grounding context for one section of one document.
pub struct Retriever {
    embedder: SharedEmbedder,
    index: Arc<dyn VectorIndex>,
    storage: Arc<dyn Storage>,
    top_k: usize,
    min_similarity: f32,
}

impl Retriever {
    pub fn new(
        embedder: SharedEmbedder,
        index: Arc<dyn VectorIndex>,
        storage: Arc<dyn Storage>,
        top_k: usize,
        min_similarity: f32,
    ) -> Self {
        Self {
            embedder,
            index,
            storage,
            top_k,
            min_similarity,
        }
    }

    /// Deterministic query text: section name, then title, then domain,
    /// then keywords in stored order.
    pub fn build_query(document: &Document, section: &str) -> String {
        let mut parts = vec![section.to_string(), document.title.clone()];
        if !document.domain.is_empty() {
            parts.push(document.domain.clone());
        }
        parts.extend(document.keywords.iter().cloned());
        parts.join(" ")
    }

    /// Ranked chunks above the similarity floor for `section`, at most
    /// `top_k`. An empty result is an [`RetrievalError::InsufficientGrounding`]
    /// error, not an empty success.
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn retrieve(
        &self,
        document: &Document,
        section: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let query = Self::build_query(document, section);
        let vector = self.embedder.encode(&query).await?;
        let hits = self.index.query(document.id, &vector, self.top_k).await?;

        let mut retrieved = Vec::new();
        for hit in hits {
            if hit.similarity < self.min_similarity {
                continue;
            }
            if let Some(chunk) = self.storage.get_chunk(hit.chunk_id).await? {
                retrieved.push(RetrievedChunk {
                    chunk,
                    similarity: hit.similarity,
                });
            }
        }
        debug!(hits = retrieved.len(), "retrieval complete");
        if retrieved.is_empty() {
            return Err(RetrievalError::InsufficientGrounding {
                section: section.to_string(),
                min_similarity: self.min_similarity,
            });
        }
        Ok(retrieved)
    }
}
