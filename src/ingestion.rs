//! Source file ingestion: extract, chunk, embed, index, persist.
//!
//! Ingestion is per-file isolated: one corrupt upload marks that file
//! failed and moves on, it never poisons the batch. A file only reaches
//! `Extracted` status once its chunks and vectors are all persisted, so a
//! file is either fully ingested or recorded as failed with a reason.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chunking::{ChunkError, TextChunker};
use crate::embedding::{EmbedError, SharedEmbedder};
use crate::index::{IndexError, VectorIndex};
use crate::models::{Chunk, DocumentId, ExtractionStatus, SourceFile, SourceFileId, SourceKind};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("extraction failed for '{filename}': {reason}")]
    #[diagnostic(code(paperweave::ingestion::extraction))]
    Extraction { filename: String, reason: String },

    #[error("no extractor supports {kind:?}")]
    #[diagnostic(
        code(paperweave::ingestion::unsupported),
        help("Register an extractor for this format or reject the upload earlier.")
    )]
    Unsupported { kind: SourceKind },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunk(#[from] ChunkError),

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

/// Turns raw upload bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn supports(&self, kind: SourceKind) -> bool;
    async fn extract(
        &self,
        filename: &str,
        kind: SourceKind,
        bytes: &[u8],
    ) -> Result<String, IngestError>;
}

/// Extractor for plain-text uploads; rejects invalid UTF-8.
pub struct Utf8Extractor;

#[async_trait]
impl TextExtractor for Utf8Extractor {
    fn supports(&self, kind: SourceKind) -> bool {
        kind == SourceKind::PlainText
    }

    async fn extract(
        &self,
        filename: &str,
        _kind: SourceKind,
        bytes: &[u8],
    ) -> Result<String, IngestError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| IngestError::Extraction {
            filename: filename.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One upload waiting to be ingested.
pub struct Upload {
    pub filename: String,
    pub kind: SourceKind,
    pub bytes: Vec<u8>,
}

/// Batch outcome; failed files carry the reason they were skipped.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<SourceFileId>,
    pub failed: Vec<(String, String)>,
    pub chunks_indexed: usize,
}

/// Drives the extract → chunk → embed → index → persist pipeline.
pub struct IngestionService {
    extractors: Vec<Box<dyn TextExtractor>>,
    chunker: TextChunker,
    embedder: SharedEmbedder,
    index: Arc<dyn VectorIndex>,
    storage: Arc<dyn Storage>,
}

impl IngestionService {
    pub fn new(
        extractors: Vec<Box<dyn TextExtractor>>,
        chunker: TextChunker,
        embedder: SharedEmbedder,
        index: Arc<dyn VectorIndex>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            extractors,
            chunker,
            embedder,
            index,
            storage,
        }
    }

    fn extractor_for(&self, kind: SourceKind) -> Result<&dyn TextExtractor, IngestError> {
        self.extractors
            .iter()
            .find(|e| e.supports(kind))
            .map(|e| e.as_ref())
            .ok_or(IngestError::Unsupported { kind })
    }

    /// Ingests one upload end to end. On failure the file row is still
    /// persisted, carrying the failure reason in its extraction status.
    #[instrument(skip_all, fields(document_id = %document_id, filename = %upload.filename))]
    pub async fn ingest_file(
        &self,
        document_id: DocumentId,
        upload: &Upload,
    ) -> Result<SourceFile, IngestError> {
        let mut file = SourceFile::new(
            document_id,
            upload.filename.clone(),
            upload.kind,
            upload.bytes.len(),
        );
        self.storage.insert_file(file.clone()).await?;

        match self.ingest_inner(&file, upload).await {
            Ok(count) => {
                file.extraction = ExtractionStatus::Extracted;
                self.storage.update_file(file.clone()).await?;
                info!(chunks = count, "file ingested");
                Ok(file)
            }
            Err(err) => {
                file.extraction = ExtractionStatus::Failed {
                    reason: err.to_string(),
                };
                self.storage.update_file(file.clone()).await?;
                Err(err)
            }
        }
    }

    async fn ingest_inner(&self, file: &SourceFile, upload: &Upload) -> Result<usize, IngestError> {
        let extractor = self.extractor_for(upload.kind)?;
        let text = extractor
            .extract(&upload.filename, upload.kind, &upload.bytes)
            .await?;
        let spans = self.chunker.chunk(&text)?;

        let mut chunks = Vec::with_capacity(spans.len());
        for (ordinal, span) in spans.into_iter().enumerate() {
            let embedding = self.embedder.encode(&span).await?;
            chunks.push(Chunk {
                id: Uuid::new_v4(),
                file_id: file.id,
                document_id: file.document_id,
                ordinal,
                text: span,
                embedding,
                metadata: serde_json::json!({
                    "filename": file.filename,
                    "ordinal": ordinal,
                }),
            });
        }
        for chunk in &chunks {
            self.index
                .upsert(
                    chunk.document_id,
                    chunk.id,
                    chunk.ordinal,
                    chunk.embedding.clone(),
                )
                .await?;
        }
        let count = chunks.len();
        self.storage.insert_chunks(chunks).await?;
        Ok(count)
    }

    /// Ingests a batch with per-file isolation: each failure is recorded
    /// and the rest of the batch proceeds.
    pub async fn ingest_files(
        &self,
        document_id: DocumentId,
        uploads: &[Upload],
    ) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::default();
        for upload in uploads {
            match self.ingest_file(document_id, upload).await {
                Ok(file) => {
                    report.ingested.push(file.id);
                    report.chunks_indexed += self
                        .storage
                        .chunks_for_document(document_id)
                        .await?
                        .iter()
                        .filter(|c| c.file_id == file.id)
                        .count();
                }
                Err(err) => {
                    warn!(filename = %upload.filename, error = %err, "upload skipped");
                    report.failed.push((upload.filename.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }
}
