//! Durable persistence boundary for documents, files, chunks, sections and
//! jobs.
//!
//! The orchestrator's crash-resume contract lives here: a section row plus
//! the subsequent job save with `next_index` advanced are the only durable
//! checkpoint, so any backend implementing this trait must make each call
//! atomic on its own. The in-memory backend is the reference
//! implementation used throughout the test suite.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::models::{
    Chunk, ChunkId, Document, DocumentId, DocumentStatus, GenerationJob, Section, SourceFile,
    SourceFileId,
};

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("document {0} not found")]
    #[diagnostic(code(paperweave::storage::document_not_found))]
    DocumentNotFound(DocumentId),

    #[error("source file {0} not found")]
    #[diagnostic(code(paperweave::storage::file_not_found))]
    FileNotFound(SourceFileId),

    #[error("no generation job for document {0}")]
    #[diagnostic(code(paperweave::storage::job_not_found))]
    JobNotFound(DocumentId),

    #[error("storage backend error: {0}")]
    #[diagnostic(code(paperweave::storage::backend))]
    Backend(String),
}

/// CRUD surface the pipeline persists through.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_document(&self, document: Document) -> Result<(), StorageError>;
    async fn get_document(&self, id: DocumentId) -> Result<Document, StorageError>;
    async fn set_document_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<(), StorageError>;

    async fn insert_file(&self, file: SourceFile) -> Result<(), StorageError>;
    async fn update_file(&self, file: SourceFile) -> Result<(), StorageError>;
    async fn files_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<SourceFile>, StorageError>;

    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), StorageError>;
    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StorageError>;
    async fn chunks_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Chunk>, StorageError>;

    /// Inserts or replaces the one section row keyed by (document, name).
    async fn upsert_section(&self, section: Section) -> Result<(), StorageError>;
    /// Sections of one document in catalog order (`order_index` ascending).
    async fn sections_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Section>, StorageError>;

    /// Inserts or replaces the one job row per document. This save is the
    /// orchestrator's resumability checkpoint.
    async fn save_job(&self, job: GenerationJob) -> Result<(), StorageError>;
    async fn get_job(&self, document_id: DocumentId) -> Result<Option<GenerationJob>, StorageError>;
}

#[derive(Default)]
struct Tables {
    documents: FxHashMap<DocumentId, Document>,
    files: FxHashMap<SourceFileId, SourceFile>,
    chunks: FxHashMap<ChunkId, Chunk>,
    sections: FxHashMap<(DocumentId, String), Section>,
    jobs: FxHashMap<DocumentId, GenerationJob>,
}

/// Reference backend holding every table in process memory.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_document(&self, document: Document) -> Result<(), StorageError> {
        self.tables.write().documents.insert(document.id, document);
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Document, StorageError> {
        self.tables
            .read()
            .documents
            .get(&id)
            .cloned()
            .ok_or(StorageError::DocumentNotFound(id))
    }

    async fn set_document_status(
        &self,
        id: DocumentId,
        status: DocumentStatus,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let document = tables
            .documents
            .get_mut(&id)
            .ok_or(StorageError::DocumentNotFound(id))?;
        document.status = status;
        Ok(())
    }

    async fn insert_file(&self, file: SourceFile) -> Result<(), StorageError> {
        self.tables.write().files.insert(file.id, file);
        Ok(())
    }

    async fn update_file(&self, file: SourceFile) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if !tables.files.contains_key(&file.id) {
            return Err(StorageError::FileNotFound(file.id));
        }
        tables.files.insert(file.id, file);
        Ok(())
    }

    async fn files_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<SourceFile>, StorageError> {
        let mut files: Vec<SourceFile> = self
            .tables
            .read()
            .files
            .values()
            .filter(|f| f.document_id == document_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(files)
    }

    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        for chunk in chunks {
            tables.chunks.insert(chunk.id, chunk);
        }
        Ok(())
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<Chunk>, StorageError> {
        Ok(self.tables.read().chunks.get(&id).cloned())
    }

    async fn chunks_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Chunk>, StorageError> {
        let mut chunks: Vec<Chunk> = self
            .tables
            .read()
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| (a.file_id, a.ordinal).cmp(&(b.file_id, b.ordinal)));
        Ok(chunks)
    }

    async fn upsert_section(&self, section: Section) -> Result<(), StorageError> {
        self.tables
            .write()
            .sections
            .insert((section.document_id, section.name.clone()), section);
        Ok(())
    }

    async fn sections_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Section>, StorageError> {
        let mut sections: Vec<Section> = self
            .tables
            .read()
            .sections
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        sections.sort_by_key(|s| s.order_index);
        Ok(sections)
    }

    async fn save_job(&self, job: GenerationJob) -> Result<(), StorageError> {
        self.tables.write().jobs.insert(job.document_id, job);
        Ok(())
    }

    async fn get_job(&self, document_id: DocumentId) -> Result<Option<GenerationJob>, StorageError> {
        Ok(self.tables.read().jobs.get(&document_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_document() -> Document {
        Document::new(
            "Adaptive Scheduling",
            "distributed systems",
            vec!["R. Voss".into()],
            vec!["University of Utrecht".into()],
            vec!["scheduling".into()],
        )
    }

    #[tokio::test]
    async fn document_round_trip_and_status_update() {
        let storage = InMemoryStorage::new();
        let doc = sample_document();
        let id = doc.id;
        storage.insert_document(doc).await.unwrap();

        storage
            .set_document_status(id, DocumentStatus::Generating)
            .await
            .unwrap();
        let loaded = storage.get_document(id).await.unwrap();
        assert_eq!(loaded.status, DocumentStatus::Generating);

        let missing = storage.get_document(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(StorageError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn upsert_section_replaces_by_document_and_name() {
        let storage = InMemoryStorage::new();
        let doc_id = Uuid::new_v4();
        for content in ["first draft", "second draft"] {
            storage
                .upsert_section(Section {
                    document_id: doc_id,
                    name: "Abstract".into(),
                    content: content.into(),
                    word_count: 2,
                    order_index: 0,
                    generated_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let sections = storage.sections_for_document(doc_id).await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].content, "second draft");
    }

    #[tokio::test]
    async fn sections_come_back_in_catalog_order() {
        let storage = InMemoryStorage::new();
        let doc_id = Uuid::new_v4();
        for (name, order_index) in [("Conclusion", 9), ("Abstract", 0), ("Results", 7)] {
            storage
                .upsert_section(Section {
                    document_id: doc_id,
                    name: name.into(),
                    content: "text".into(),
                    word_count: 1,
                    order_index,
                    generated_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = storage
            .sections_for_document(doc_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Abstract", "Results", "Conclusion"]);
    }

    #[tokio::test]
    async fn job_save_is_an_upsert() {
        let storage = InMemoryStorage::new();
        let doc_id = Uuid::new_v4();
        let mut job = GenerationJob::new(doc_id, vec!["Abstract".into()]);
        storage.save_job(job.clone()).await.unwrap();
        job.next_index = 1;
        storage.save_job(job).await.unwrap();

        let loaded = storage.get_job(doc_id).await.unwrap().unwrap();
        assert_eq!(loaded.next_index, 1);
        assert!(storage.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }
}
