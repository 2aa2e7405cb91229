//! Pipeline configuration with environment overrides.
//!
//! Every knob has a production default; `PAPERWEAVE_*` environment
//! variables (loaded through `dotenvy`) override individual values without
//! touching code. Validation is fatal at startup: a misconfigured chunker
//! or an empty section catalog must never surface mid-job.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::catalog::SectionCatalog;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    #[diagnostic(
        code(paperweave::config::chunk_overlap),
        help("Set PAPERWEAVE_CHUNK_OVERLAP below PAPERWEAVE_CHUNK_SIZE.")
    )]
    ChunkOverlap { size: usize, overlap: usize },

    #[error("section catalog is empty")]
    #[diagnostic(code(paperweave::config::empty_catalog))]
    EmptyCatalog,

    #[error("section '{section}' has invalid word bounds {min}..{max}")]
    #[diagnostic(
        code(paperweave::config::word_bounds),
        help("Every catalog section needs min_words < max_words.")
    )]
    WordBounds {
        section: String,
        min: usize,
        max: usize,
    },

    #[error("min_similarity {0} must be within 0.0..=1.0")]
    #[diagnostic(code(paperweave::config::min_similarity))]
    MinSimilarity(f32),
}

/// What the orchestrator does when retrieval clears no chunk above the
/// similarity threshold for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundingFallback {
    /// Generate from a context-free prompt and record the degradation.
    #[default]
    DegradedPrompt,
    /// Mark the section failed and fail the job.
    FailSection,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunk window in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Embedding vector dimension D.
    pub embedding_dimension: usize,
    /// Ceiling on a blocking wait for the embedding model to become ready.
    pub embed_load_timeout: Duration,
    /// Number of chunks requested per retrieval.
    pub top_k: usize,
    /// Cosine similarity floor for retrieved chunks.
    pub min_similarity: f32,
    /// Decoding budget per generated section.
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Wall-clock ceiling for one generation call.
    pub generation_timeout: Duration,
    /// Retry attempts for transient generation failures.
    pub generation_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub generation_backoff: Duration,
    /// Wall-clock ceiling across all sections of one job.
    pub job_deadline: Duration,
    /// Page estimate divisor for IEEE two-column layout.
    pub words_per_page: usize,
    pub grounding_fallback: GroundingFallback,
    /// External typesetting binary.
    pub latex_tool: String,
    /// Ceiling for one typesetting pass.
    pub latex_pass_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_dimension: 384,
            embed_load_timeout: Duration::from_secs(60),
            top_k: 10,
            min_similarity: 0.6,
            max_output_tokens: 2000,
            temperature: 0.7,
            generation_timeout: Duration::from_secs(120),
            generation_retries: 3,
            generation_backoff: Duration::from_secs(2),
            job_deadline: Duration::from_secs(30 * 60),
            words_per_page: 250,
            grounding_fallback: GroundingFallback::default(),
            latex_tool: "pdflatex".to_string(),
            latex_pass_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    /// Builds a config from defaults plus `PAPERWEAVE_*` environment
    /// overrides. Unparseable values fall back to the default rather than
    /// aborting, matching how the rest of the env surface behaves.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        cfg.chunk_size = env_parse("PAPERWEAVE_CHUNK_SIZE", cfg.chunk_size);
        cfg.chunk_overlap = env_parse("PAPERWEAVE_CHUNK_OVERLAP", cfg.chunk_overlap);
        cfg.embedding_dimension = env_parse("PAPERWEAVE_EMBED_DIM", cfg.embedding_dimension);
        cfg.top_k = env_parse("PAPERWEAVE_TOP_K", cfg.top_k);
        cfg.min_similarity = env_parse("PAPERWEAVE_MIN_SIMILARITY", cfg.min_similarity);
        cfg.max_output_tokens = env_parse("PAPERWEAVE_MAX_OUTPUT_TOKENS", cfg.max_output_tokens);
        cfg.temperature = env_parse("PAPERWEAVE_TEMPERATURE", cfg.temperature);
        cfg.generation_retries = env_parse("PAPERWEAVE_GENERATION_RETRIES", cfg.generation_retries);
        cfg.words_per_page = env_parse("PAPERWEAVE_WORDS_PER_PAGE", cfg.words_per_page);
        if let Ok(secs) = std::env::var("PAPERWEAVE_JOB_DEADLINE_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.job_deadline = Duration::from_secs(secs);
            }
        }
        if let Ok(tool) = std::env::var("PAPERWEAVE_LATEX_TOOL") {
            cfg.latex_tool = tool;
        }
        cfg
    }

    /// Startup validation of the config against the section catalog.
    ///
    /// A plan section without word bounds is a programming error and must
    /// never be discovered at request time.
    pub fn validate(&self, catalog: &SectionCatalog) -> Result<(), ConfigError> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::ChunkOverlap {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(ConfigError::MinSimilarity(self.min_similarity));
        }
        if catalog.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        for spec in catalog.sections() {
            if spec.min_words >= spec.max_words {
                return Err(ConfigError::WordBounds {
                    section: spec.name.clone(),
                    min: spec.min_words,
                    max: spec.max_words,
                });
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_against_standard_catalog() {
        let cfg = PipelineConfig::default();
        cfg.validate(&SectionCatalog::ieee_conference()).unwrap();
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let cfg = PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        let err = cfg
            .validate(&SectionCatalog::ieee_conference())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ChunkOverlap { .. }));
    }

    #[test]
    fn similarity_floor_is_range_checked() {
        let cfg = PipelineConfig {
            min_similarity: 1.5,
            ..Default::default()
        };
        let err = cfg
            .validate(&SectionCatalog::ieee_conference())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MinSimilarity(_)));
    }
}
