//! Text generation with bounded retries and wall-clock timeouts.
//!
//! The model endpoint is unreliable by assumption. Every call runs under a
//! wall-clock timeout; transient failures (rate limits, server errors,
//! timeouts) are retried with exponential backoff, while fatal failures
//! (authentication, malformed request) abort immediately. Backoff state
//! never outlives the call, so concurrent generations do not interfere.

mod http;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{instrument, warn};

pub use http::HttpGenerationClient;
pub use mock::MockGenerationService;

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum GenerationError {
    #[error("generation endpoint rate limited the request")]
    #[diagnostic(code(paperweave::generation::rate_limited))]
    RateLimited,

    #[error("transient generation failure: {0}")]
    #[diagnostic(code(paperweave::generation::transient))]
    Transient(String),

    #[error("generation call exceeded {0:?}")]
    #[diagnostic(code(paperweave::generation::timeout))]
    Timeout(Duration),

    #[error("fatal generation failure: {0}")]
    #[diagnostic(
        code(paperweave::generation::fatal),
        help("Fatal failures are not retried; fix the request or credentials.")
    )]
    Fatal(String),

    #[error("generation failed after {attempts} attempts: {last}")]
    #[diagnostic(code(paperweave::generation::exhausted))]
    ExhaustedRetries { attempts: u32, last: String },
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited
                | GenerationError::Transient(_)
                | GenerationError::Timeout(_)
        )
    }
}

/// Decoding parameters for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// Retry schedule for transient generation failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 3 means up to 4 calls total.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub initial_backoff: Duration,
    /// Wall-clock ceiling per call.
    pub call_timeout: Duration,
}

/// One call to a text generation model.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}

/// Successful generation plus how many calls it took.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub attempts: u32,
}

/// Runs `service.generate` under the retry policy.
///
/// Each call is bounded by `call_timeout`; a timeout counts as a transient
/// failure. Fatal errors return immediately without consuming retries.
#[instrument(skip_all, fields(max_retries = policy.max_retries))]
pub async fn generate_with_retry(
    service: &dyn GenerationService,
    prompt: &str,
    params: &GenerationParams,
    policy: &RetryPolicy,
) -> Result<GeneratedText, GenerationError> {
    let mut backoff = policy.initial_backoff;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout(
            policy.call_timeout,
            service.generate(prompt, params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(policy.call_timeout)),
        };
        match outcome {
            Ok(text) => return Ok(GeneratedText { text, attempts }),
            Err(err) if err.is_transient() => {
                if attempts > policy.max_retries {
                    return Err(GenerationError::ExhaustedRetries {
                        attempts,
                        last: err.to_string(),
                    });
                }
                warn!(attempt = attempts, error = %err, "transient generation failure, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(fatal) => return Err(fatal),
        }
    }
}
