//! ```text
//! Source files ──► ingestion::IngestionService ──► chunking::TextChunker
//!                                   │                      │
//!                                   │        embedding::SharedEmbedder
//!                                   │                      │
//!                                   └──► index::VectorIndex + storage::Storage
//!
//! Section plan ──► retrieval::Retriever ──► prompt::build_section_prompt
//!                                   │
//!                  generation::GenerationService (retry + timeout)
//!                                   │
//!                  postprocess::to_latex ──► persisted Section
//!                                   │
//!                  orchestrator::Orchestrator (checkpointed job loop)
//!                                   │
//!                  compiler::LatexCompiler (two-pass typesetting)
//! ```
//!
//! Paperweave grounds generated paper sections in an uploaded corpus of
//! reference documents. Ingestion splits extracted text into overlapping
//! chunks, embeds them, and stores the vectors scoped to their owning
//! document. At generation time the [`orchestrator::Orchestrator`] walks a
//! fixed section plan, retrieving document-scoped context for each section,
//! prompting a remote generation service, normalizing the output into LaTeX,
//! and durably checkpointing progress after every section so a crashed or
//! failed job resumes exactly where it stopped. Once every planned section
//! is done, the [`compiler::LatexCompiler`] assembles the template and runs
//! the external typesetting tool twice to resolve citations.

pub mod catalog;
pub mod chunking;
pub mod compiler;
pub mod config;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod ingestion;
pub mod models;
pub mod orchestrator;
pub mod postprocess;
pub mod prompt;
pub mod retrieval;
pub mod storage;

pub use catalog::{SectionCatalog, SectionSpec};
pub use chunking::{ChunkError, TextChunker};
pub use compiler::{CompileError, CompiledPaper, LatexCompiler};
pub use config::PipelineConfig;
pub use embedding::{EmbedError, Embedder, MockEmbedder, SharedEmbedder};
pub use generation::{GenerationError, GenerationParams, GenerationService, RetryPolicy};
pub use index::{InMemoryVectorIndex, IndexError, VectorIndex};
pub use ingestion::{IngestError, IngestionService, TextExtractor};
pub use models::{
    Chunk, Document, DocumentId, DocumentStatus, GenerationJob, JobStatus, Section,
    SectionOutcome, SourceFile, StatusSnapshot,
};
pub use orchestrator::{JobError, Orchestrator};
pub use retrieval::{RetrievalError, RetrievedChunk, Retriever};
pub use storage::{InMemoryStorage, Storage, StorageError};
