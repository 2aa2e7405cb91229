//! Checkpointed section-generation job loop.
//!
//! The orchestrator walks a document's section plan in order. After each
//! section it persists the section row and then saves the job with
//! `next_index` advanced; that pair of writes is the durable checkpoint,
//! so a process crash between sections loses at most the section that was
//! in flight. A failed job is resumable: resuming retries only the
//! sections that never reached `Done`, with prior attempt counts kept.
//!
//! Concurrency control is a per-document async mutex. The runner holds it
//! for the whole job, so two drivers for the same document cannot
//! interleave; a second caller observes [`JobError::AlreadyRunning`].

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::catalog::SectionCatalog;
use crate::config::{GroundingFallback, PipelineConfig};
use crate::generation::{
    generate_with_retry, GenerationParams, GenerationService, RetryPolicy,
};
use crate::models::{
    DocumentId, DocumentStatus, GenerationJob, JobStatus, Section, SectionOutcome, StatusSnapshot,
};
use crate::postprocess;
use crate::prompt;
use crate::retrieval::{RetrievalError, Retriever};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    #[error("a generation job is already running for document {0}")]
    #[diagnostic(code(paperweave::orchestrator::already_running))]
    AlreadyRunning(DocumentId),

    #[error("no generation job exists for document {0}")]
    #[diagnostic(
        code(paperweave::orchestrator::not_started),
        help("Call start() before querying status or resuming.")
    )]
    NotStarted(DocumentId),

    #[error("plan references '{section}', which is not in the section catalog")]
    #[diagnostic(code(paperweave::orchestrator::invalid_plan))]
    InvalidPlan { section: String },

    #[error("generation job for document {0} already completed")]
    #[diagnostic(code(paperweave::orchestrator::not_resumable))]
    NotResumable(DocumentId),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

struct Inner {
    storage: Arc<dyn Storage>,
    retriever: Retriever,
    generator: Arc<dyn GenerationService>,
    catalog: SectionCatalog,
    config: PipelineConfig,
    locks: parking_lot::Mutex<FxHashMap<DocumentId, Arc<Mutex<()>>>>,
}

/// Drives generation jobs; cheap to clone, shares all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        retriever: Retriever,
        generator: Arc<dyn GenerationService>,
        catalog: SectionCatalog,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                retriever,
                generator,
                catalog,
                config,
                locks: parking_lot::Mutex::new(FxHashMap::default()),
            }),
        }
    }

    fn lock_for(&self, document_id: DocumentId) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(document_id)
            .or_default()
            .clone()
    }

    /// Starts (or resumes) the job for `document_id` in the background and
    /// returns the current status.
    ///
    /// Idempotent: calling it while the job runs or after completion just
    /// reports status without spawning a second driver.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn start(&self, document_id: DocumentId) -> Result<StatusSnapshot, JobError> {
        // Verify the document exists before creating any job state.
        self.inner.storage.get_document(document_id).await?;

        let job = match self.inner.storage.get_job(document_id).await? {
            Some(job) => job,
            None => {
                let job = GenerationJob::new(document_id, self.inner.catalog.names());
                self.inner.storage.save_job(job.clone()).await?;
                job
            }
        };

        let lock = self.lock_for(document_id);
        let should_spawn = job.status != JobStatus::Completed && lock.try_lock().is_ok();
        if should_spawn {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.run_to_completion(document_id).await {
                    warn!(%document_id, error = %err, "generation job driver failed");
                }
            });
        }
        self.status(document_id).await
    }

    /// Runs the job to a terminal state on the caller's task.
    ///
    /// Fails fast with [`JobError::AlreadyRunning`] if another driver holds
    /// the document lock. A job that ends in `Failed` is reported through
    /// the returned snapshot, not as an error; `Err` is reserved for
    /// infrastructure problems.
    pub async fn run_to_completion(
        &self,
        document_id: DocumentId,
    ) -> Result<StatusSnapshot, JobError> {
        let lock = self.lock_for(document_id);
        let _guard = lock
            .try_lock()
            .map_err(|_| JobError::AlreadyRunning(document_id))?;
        self.drive(document_id).await?;
        self.status(document_id).await
    }

    /// Point-in-time job view, recomputed from durable state so it is
    /// correct across process restarts.
    pub async fn status(&self, document_id: DocumentId) -> Result<StatusSnapshot, JobError> {
        let job = self
            .inner
            .storage
            .get_job(document_id)
            .await?
            .ok_or(JobError::NotStarted(document_id))?;
        let total = job.plan.len();
        let done = job.sections_done();
        let current_section = match job.status {
            JobStatus::Completed => None,
            _ => job.first_unfinished().map(|i| job.plan[i].clone()),
        };
        Ok(StatusSnapshot {
            overall_status: job.status,
            sections_generated: done,
            total_sections: total,
            current_section,
            progress_percentage: if total == 0 {
                100
            } else {
                ((done * 100) / total) as u8
            },
            total_words: job.total_words,
            estimated_pages: job.total_words as f64 / self.inner.config.words_per_page as f64,
        })
    }

    async fn drive(&self, document_id: DocumentId) -> Result<(), JobError> {
        let mut job = self
            .inner
            .storage
            .get_job(document_id)
            .await?
            .ok_or(JobError::NotStarted(document_id))?;
        if job.status == JobStatus::Completed {
            return Err(JobError::NotResumable(document_id));
        }
        for name in &job.plan {
            if self.inner.catalog.spec(name).is_none() {
                return Err(JobError::InvalidPlan {
                    section: name.clone(),
                });
            }
        }

        job.status = JobStatus::Running;
        job.failure_reason = None;
        job.updated_at = Utc::now();
        self.inner.storage.save_job(job.clone()).await?;
        self.inner
            .storage
            .set_document_status(document_id, DocumentStatus::Generating)
            .await?;

        let deadline = Instant::now() + self.inner.config.job_deadline;
        while let Some(idx) = job.first_unfinished() {
            if Instant::now() >= deadline {
                return self
                    .fail_job(&mut job, "job deadline exceeded".to_string())
                    .await;
            }
            let name = job.plan[idx].clone();
            match self.generate_section(&mut job, idx, &name).await? {
                SectionRun::Done => {
                    job.next_index = job.first_unfinished().unwrap_or(job.plan.len());
                    job.updated_at = Utc::now();
                    // Checkpoint: the section row is already durable, this
                    // save makes the progress durable too.
                    self.inner.storage.save_job(job.clone()).await?;
                    info!(section = %name, "section checkpointed");
                }
                SectionRun::Failed(reason) => {
                    job.outcomes[idx] = SectionOutcome::Failed {
                        reason: reason.clone(),
                    };
                    job.next_index = idx;
                    return self
                        .fail_job(&mut job, format!("section '{name}' failed: {reason}"))
                        .await;
                }
            }
        }

        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        self.inner.storage.save_job(job.clone()).await?;
        self.inner
            .storage
            .set_document_status(document_id, DocumentStatus::Complete)
            .await?;
        info!(%document_id, words = job.total_words, "generation job completed");
        Ok(())
    }

    async fn fail_job(&self, job: &mut GenerationJob, reason: String) -> Result<(), JobError> {
        warn!(document_id = %job.document_id, %reason, "generation job failed");
        job.status = JobStatus::Failed;
        job.failure_reason = Some(reason);
        job.updated_at = Utc::now();
        self.inner.storage.save_job(job.clone()).await?;
        self.inner
            .storage
            .set_document_status(job.document_id, DocumentStatus::Failed)
            .await?;
        Ok(())
    }

    async fn generate_section(
        &self,
        job: &mut GenerationJob,
        idx: usize,
        name: &str,
    ) -> Result<SectionRun, JobError> {
        let document = self.inner.storage.get_document(job.document_id).await?;
        let spec = self
            .inner
            .catalog
            .spec(name)
            .ok_or_else(|| JobError::InvalidPlan {
                section: name.to_string(),
            })?
            .clone();

        let prompt_text = match self.inner.retriever.retrieve(&document, name).await {
            Ok(context) => prompt::build_section_prompt(&document, &spec, &context),
            Err(RetrievalError::InsufficientGrounding { .. }) => {
                match self.inner.config.grounding_fallback {
                    GroundingFallback::DegradedPrompt => {
                        warn!(section = name, "no grounding context, degrading prompt");
                        if !job.degraded_sections.iter().any(|s| s == name) {
                            job.degraded_sections.push(name.to_string());
                        }
                        prompt::build_degraded_prompt(&document, &spec)
                    }
                    GroundingFallback::FailSection => {
                        return Ok(SectionRun::Failed(
                            "no chunk cleared the similarity floor".to_string(),
                        ));
                    }
                }
            }
            Err(other) => return Ok(SectionRun::Failed(other.to_string())),
        };

        let params = GenerationParams {
            max_output_tokens: self.inner.config.max_output_tokens,
            temperature: self.inner.config.temperature,
        };
        let policy = RetryPolicy {
            max_retries: self.inner.config.generation_retries,
            initial_backoff: self.inner.config.generation_backoff,
            call_timeout: self.inner.config.generation_timeout,
        };
        let generated = match generate_with_retry(
            self.inner.generator.as_ref(),
            &prompt_text,
            &params,
            &policy,
        )
        .await
        {
            Ok(generated) => generated,
            Err(err) => {
                job.attempts[idx] += self.inner.config.generation_retries + 1;
                return Ok(SectionRun::Failed(err.to_string()));
            }
        };
        job.attempts[idx] += generated.attempts;

        let processed = postprocess::to_latex(&generated.text);
        if !spec.within_bounds(processed.word_count)
            && !job.bound_violations.iter().any(|s| s == name)
        {
            warn!(
                section = name,
                words = processed.word_count,
                "word count outside configured bounds"
            );
            job.bound_violations.push(name.to_string());
        }

        // The section row goes durable before the job checkpoint advances.
        self.inner
            .storage
            .upsert_section(Section {
                document_id: job.document_id,
                name: name.to_string(),
                content: processed.content,
                word_count: processed.word_count,
                order_index: self.inner.catalog.order_of(name).ok_or_else(|| {
                    JobError::InvalidPlan {
                        section: name.to_string(),
                    }
                })?,
                generated_at: Utc::now(),
            })
            .await?;

        job.outcomes[idx] = SectionOutcome::Done {
            word_count: processed.word_count,
        };
        job.total_words = job
            .outcomes
            .iter()
            .filter_map(|o| match o {
                SectionOutcome::Done { word_count } => Some(word_count),
                _ => None,
            })
            .sum();
        Ok(SectionRun::Done)
    }

    /// Divisor used for the page estimate in status reports.
    pub fn words_per_page(&self) -> usize {
        self.inner.config.words_per_page
    }

    #[cfg(test)]
    fn hold_lock(&self, document_id: DocumentId) -> tokio::sync::OwnedMutexGuard<()> {
        self.lock_for(document_id)
            .try_lock_owned()
            .expect("lock free")
    }
}

enum SectionRun {
    Done,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::embedding::{MockEmbedder, SharedEmbedder};
    use crate::generation::{GenerationError, MockGenerationService};
    use crate::index::{InMemoryVectorIndex, VectorIndex};
    use crate::models::{Chunk, Document};
    use crate::storage::InMemoryStorage;
    use uuid::Uuid;

    fn catalog() -> SectionCatalog {
        SectionCatalog::ieee_conference()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            generation_backoff: Duration::from_millis(1),
            generation_timeout: Duration::from_millis(500),
            min_similarity: 0.2,
            ..Default::default()
        }
    }

    async fn seeded_world(
        generator: Arc<dyn GenerationService>,
        config: PipelineConfig,
    ) -> (Orchestrator, Arc<InMemoryStorage>, Document) {
        let storage = Arc::new(InMemoryStorage::new());
        let index = Arc::new(InMemoryVectorIndex::new(64));
        let embedder = SharedEmbedder::new(Arc::new(MockEmbedder::new(64)), Duration::from_secs(1));

        let document = Document::new(
            "Grounded Generation of Survey Papers",
            "information retrieval",
            vec!["J. Ueda".into()],
            vec!["NAIST".into()],
            vec!["retrieval".into(), "generation".into()],
        );
        storage.insert_document(document.clone()).await.unwrap();

        // Corpus chunk sharing vocabulary with every query.
        let text = "retrieval generation survey papers information retrieval grounded";
        let embedding = embedder.encode(text).await.unwrap();
        let chunk_id = Uuid::new_v4();
        index
            .upsert(document.id, chunk_id, 0, embedding.clone())
            .await
            .unwrap();
        storage
            .insert_chunks(vec![Chunk {
                id: chunk_id,
                file_id: Uuid::new_v4(),
                document_id: document.id,
                ordinal: 0,
                text: text.into(),
                embedding,
                metadata: serde_json::json!({}),
            }])
            .await
            .unwrap();

        let retriever = Retriever::new(
            embedder,
            index,
            storage.clone(),
            config.top_k,
            config.min_similarity,
        );
        let orchestrator = Orchestrator::new(
            storage.clone(),
            retriever,
            generator,
            catalog(),
            config,
        );
        (orchestrator, storage, document)
    }

    #[tokio::test]
    async fn completed_job_persists_every_planned_section_in_order() {
        let generator = Arc::new(MockGenerationService::always(
            "The approach is effective [1].",
        ));
        let (orchestrator, storage, document) = seeded_world(generator, config()).await;

        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();
        let snapshot = orchestrator.run_to_completion(document.id).await.unwrap();

        assert_eq!(snapshot.overall_status, JobStatus::Completed);
        assert_eq!(snapshot.sections_generated, catalog().len());
        assert_eq!(snapshot.progress_percentage, 100);
        assert!(snapshot.current_section.is_none());

        let sections = storage.sections_for_document(document.id).await.unwrap();
        assert_eq!(
            sections.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            catalog().names()
        );
        for section in &sections {
            assert!(section.content.contains("\\cite{ref1}"));
        }
        let doc = storage.get_document(document.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Complete);
    }

    #[tokio::test]
    async fn failed_job_resumes_from_first_unfinished_section() {
        // Succeed three sections, then fail fatally.
        let mut script: Vec<Result<String, GenerationError>> = vec![
            Ok("Body one.".into()),
            Ok("Body two.".into()),
            Ok("Body three.".into()),
            Err(GenerationError::Fatal("credit exhausted".into())),
        ];
        let first = Arc::new(MockGenerationService::scripted(script.drain(..).collect()));
        let (orchestrator, storage, document) = seeded_world(first, config()).await;

        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();
        let snapshot = orchestrator.run_to_completion(document.id).await.unwrap();
        assert_eq!(snapshot.overall_status, JobStatus::Failed);
        assert_eq!(snapshot.sections_generated, 3);
        assert_eq!(snapshot.current_section.as_deref(), Some("Methodology"));

        // Same durable state, fresh driver with a healthy backend.
        let healthy = Arc::new(MockGenerationService::always("Recovered body."));
        let retriever = Retriever::new(
            SharedEmbedder::new(Arc::new(MockEmbedder::new(64)), Duration::from_secs(1)),
            Arc::new(InMemoryVectorIndex::new(64)),
            storage.clone(),
            10,
            0.2,
        );
        let resumed = Orchestrator::new(
            storage.clone(),
            retriever,
            healthy.clone(),
            catalog(),
            config(),
        );
        let snapshot = resumed.run_to_completion(document.id).await.unwrap();

        assert_eq!(snapshot.overall_status, JobStatus::Completed);
        // Only the unfinished sections were regenerated.
        assert_eq!(healthy.calls(), catalog().len() - 3);
        let sections = storage.sections_for_document(document.id).await.unwrap();
        assert_eq!(sections[0].content, "Body one.");
        assert_eq!(sections[3].content, "Recovered body.");
    }

    #[tokio::test]
    async fn concurrent_driver_is_rejected() {
        let generator = Arc::new(MockGenerationService::always("Body."));
        let (orchestrator, storage, document) = seeded_world(generator, config()).await;
        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();

        let _held = orchestrator.hold_lock(document.id);
        let err = orchestrator.run_to_completion(document.id).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_spawns_one_driver() {
        let generator = Arc::new(MockGenerationService::always("Body text."));
        let (orchestrator, _storage, document) = seeded_world(generator, config()).await;

        let first = orchestrator.start(document.id).await.unwrap();
        assert!(first.total_sections == catalog().len());
        // Second start while (or after) the background driver runs must not
        // error and must not corrupt state.
        let second = orchestrator.start(document.id).await.unwrap();
        assert_eq!(second.total_sections, catalog().len());

        // Wait for the background driver to finish.
        for _ in 0..200 {
            let snapshot = orchestrator.status(document.id).await.unwrap();
            if snapshot.overall_status == JobStatus::Completed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background driver never completed");
    }

    #[tokio::test]
    async fn unknown_document_cannot_start() {
        let generator = Arc::new(MockGenerationService::always("Body."));
        let (orchestrator, _storage, _document) = seeded_world(generator, config()).await;
        let err = orchestrator.start(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobError::Storage(_)));
    }

    #[tokio::test]
    async fn invalid_plan_section_is_rejected() {
        let generator = Arc::new(MockGenerationService::always("Body."));
        let (orchestrator, storage, document) = seeded_world(generator, config()).await;
        storage
            .save_job(GenerationJob::new(
                document.id,
                vec!["Abstract".into(), "Appendix Z".into()],
            ))
            .await
            .unwrap();
        let err = orchestrator.run_to_completion(document.id).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidPlan { .. }));
    }

    #[tokio::test]
    async fn empty_corpus_degrades_prompts_and_records_it() {
        let generator = Arc::new(MockGenerationService::always("Ungrounded body."));
        let storage = Arc::new(InMemoryStorage::new());
        let index = Arc::new(InMemoryVectorIndex::new(64));
        let embedder = SharedEmbedder::new(Arc::new(MockEmbedder::new(64)), Duration::from_secs(1));
        let document = Document::new(
            "Paper Without Sources",
            "systems",
            vec!["A. N. Other".into()],
            vec!["Nowhere U".into()],
            vec![],
        );
        storage.insert_document(document.clone()).await.unwrap();
        let retriever = Retriever::new(embedder, index, storage.clone(), 10, 0.6);
        let orchestrator = Orchestrator::new(
            storage.clone(),
            retriever,
            generator.clone(),
            catalog(),
            config(),
        );

        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();
        let snapshot = orchestrator.run_to_completion(document.id).await.unwrap();
        assert_eq!(snapshot.overall_status, JobStatus::Completed);

        let job = storage.get_job(document.id).await.unwrap().unwrap();
        assert_eq!(job.degraded_sections.len(), catalog().len());
        let prompts = generator.prompts();
        assert!(prompts[0].contains("No reference excerpts are available"));
    }

    #[tokio::test]
    async fn word_counts_outside_bounds_are_recorded_not_fatal() {
        // Far too short for every section's minimum.
        let generator = Arc::new(MockGenerationService::always("Tiny."));
        let (orchestrator, storage, document) = seeded_world(generator, config()).await;
        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();

        let snapshot = orchestrator.run_to_completion(document.id).await.unwrap();
        assert_eq!(snapshot.overall_status, JobStatus::Completed);
        let job = storage.get_job(document.id).await.unwrap().unwrap();
        assert_eq!(job.bound_violations.len(), catalog().len());
    }

    #[tokio::test]
    async fn expired_deadline_fails_the_job_before_more_sections() {
        let generator = Arc::new(MockGenerationService::always("Body."));
        let cfg = PipelineConfig {
            job_deadline: Duration::ZERO,
            ..config()
        };
        let (orchestrator, storage, document) = seeded_world(generator, cfg).await;
        storage
            .save_job(GenerationJob::new(document.id, catalog().names()))
            .await
            .unwrap();

        let snapshot = orchestrator.run_to_completion(document.id).await.unwrap();
        assert_eq!(snapshot.overall_status, JobStatus::Failed);
        assert_eq!(snapshot.sections_generated, 0);
        let job = storage.get_job(document.id).await.unwrap().unwrap();
        assert!(job.failure_reason.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn status_estimates_pages_from_word_total() {
        let generator = Arc::new(MockGenerationService::always("Body."));
        let (orchestrator, storage, document) = seeded_world(generator, config()).await;
        let mut job = GenerationJob::new(document.id, catalog().names());
        job.total_words = 500;
        storage.save_job(job).await.unwrap();

        let snapshot = orchestrator.status(document.id).await.unwrap();
        assert!((snapshot.estimated_pages - 2.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.current_section.as_deref(), Some("Abstract"));
    }
}
