//! Persisted data model shared across the pipeline.
//!
//! These types are deliberately serde-friendly and decoupled from any
//! storage backend: the [`crate::storage::Storage`] trait moves them in and
//! out of whatever relational store hosts them. Conversion and validation
//! logic lives with the components that mutate each entity (the ingestion
//! service for chunks, the orchestrator for jobs and sections).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a paper under generation.
pub type DocumentId = Uuid;
/// Identifier of an uploaded reference file.
pub type SourceFileId = Uuid;
/// Identifier of a single text chunk.
pub type ChunkId = Uuid;

/// Lifecycle of a paper document.
///
/// Only the orchestrator moves a document out of `Draft`; `Failed` is
/// re-enterable through a job resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Generating,
    Complete,
    Failed,
}

/// A paper under generation, created on first metadata submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub domain: String,
    pub authors: Vec<String>,
    pub affiliations: Vec<String>,
    pub keywords: Vec<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        domain: impl Into<String>,
        authors: Vec<String>,
        affiliations: Vec<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            domain: domain.into(),
            authors,
            affiliations,
            keywords,
            status: DocumentStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

/// Supported source file formats for text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Docx,
    PlainText,
}

/// Outcome of text extraction for a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Extracted,
    Failed { reason: String },
}

/// An uploaded reference file, immutable once extraction succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: SourceFileId,
    pub document_id: DocumentId,
    pub filename: String,
    pub kind: SourceKind,
    pub byte_len: usize,
    pub extraction: ExtractionStatus,
    pub uploaded_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(
        document_id: DocumentId,
        filename: impl Into<String>,
        kind: SourceKind,
        byte_len: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            filename: filename.into(),
            kind,
            byte_len,
            extraction: ExtractionStatus::Pending,
            uploaded_at: Utc::now(),
        }
    }
}

/// A contiguous span of extracted text with its embedding.
///
/// Ordinals are contiguous per source file starting at 0, and the embedding
/// always has exactly the configured dimension; the ingestion service
/// enforces both before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub file_id: SourceFileId,
    pub document_id: DocumentId,
    pub ordinal: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A generated paper section. At most one row per (document, name);
/// regeneration overwrites through [`crate::storage::Storage::upsert_section`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub document_id: DocumentId,
    pub name: String,
    pub content: String,
    pub word_count: usize,
    pub order_index: usize,
    pub generated_at: DateTime<Utc>,
}

/// Per-section outcome tracked on a generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SectionOutcome {
    Pending,
    Done { word_count: usize },
    Failed { reason: String },
}

impl SectionOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, SectionOutcome::Done { .. })
    }
}

/// Overall status of a generation job.
///
/// `Failed` is resumable, not permanent; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Durable record of one document's section-generation run.
///
/// The orchestrator is the only mutator. After each section is persisted the
/// job is saved again with `next_index` advanced — that save is the
/// resumability checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub document_id: DocumentId,
    pub plan: Vec<String>,
    pub next_index: usize,
    pub outcomes: Vec<SectionOutcome>,
    pub attempts: Vec<u32>,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    /// Sections whose persisted word count fell outside the configured
    /// bounds. Reported, never silently fixed.
    pub bound_violations: Vec<String>,
    /// Sections generated from a context-free prompt because retrieval
    /// found nothing above the similarity floor.
    pub degraded_sections: Vec<String>,
    pub total_words: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(document_id: DocumentId, plan: Vec<String>) -> Self {
        let len = plan.len();
        Self {
            document_id,
            plan,
            next_index: 0,
            outcomes: vec![SectionOutcome::Pending; len],
            attempts: vec![0; len],
            status: JobStatus::Pending,
            failure_reason: None,
            bound_violations: Vec::new(),
            degraded_sections: Vec::new(),
            total_words: 0,
            started_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Index of the first section that still needs generating, if any.
    pub fn first_unfinished(&self) -> Option<usize> {
        self.outcomes.iter().position(|o| !o.is_done())
    }

    pub fn sections_done(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }
}

/// Point-in-time view of a job, recomputed from durable state on every
/// status query so it survives process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub overall_status: JobStatus,
    pub sections_generated: usize,
    pub total_sections: usize,
    pub current_section: Option<String>,
    pub progress_percentage: u8,
    pub total_words: usize,
    pub estimated_pages: f64,
}
