//! Embedding model access with explicit readiness state.
//!
//! The model behind [`Embedder`] is an expensive shared resource. Instead
//! of ambient global state, [`SharedEmbedder`] is a reference-counted
//! handle with an explicit lifecycle (`Uninitialized | Loading | Ready |
//! Failed`): initialization is single-flight (concurrent callers wait on
//! the one in-flight load rather than triggering duplicates), readiness is
//! queryable, and a caller that arrives before warm-up blocks for at most
//! the configured load timeout before failing with
//! [`EmbedError::ModelUnavailable`].

mod http;
mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub use http::HttpEmbedder;
pub use mock::MockEmbedder;

#[derive(Debug, Error, Diagnostic)]
pub enum EmbedError {
    #[error("embedding model unavailable after {waited:?}{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    #[diagnostic(
        code(paperweave::embedding::unavailable),
        help("Warm the model up ahead of traffic or raise the load timeout.")
    )]
    ModelUnavailable {
        waited: Duration,
        reason: Option<String>,
    },

    #[error("embedding backend error: {0}")]
    #[diagnostic(code(paperweave::embedding::backend))]
    Backend(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(paperweave::embedding::dimension),
        help("The configured dimension must match the deployed model.")
    )]
    Dimension { expected: usize, actual: usize },
}

/// A text-to-vector model.
///
/// `embed` must be deterministic for identical input and model version, and
/// safe to call concurrently once `load` has succeeded.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimension D.
    fn dimension(&self) -> usize;

    /// One-time model initialization. Idempotent; called at most once
    /// concurrently by [`SharedEmbedder`].
    async fn load(&self) -> Result<(), EmbedError> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Explicit lifecycle of the shared model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

struct Shared {
    backend: Arc<dyn Embedder>,
    state: parking_lot::Mutex<ModelState>,
    changed: Notify,
    load_timeout: Duration,
}

/// Cheaply cloneable handle to the shared embedding model.
#[derive(Clone)]
pub struct SharedEmbedder {
    inner: Arc<Shared>,
}

enum LoadRole {
    Ready,
    Leader,
    Follower,
    Failed(String),
}

impl SharedEmbedder {
    pub fn new(backend: Arc<dyn Embedder>, load_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Shared {
                backend,
                state: parking_lot::Mutex::new(ModelState::Uninitialized),
                changed: Notify::new(),
                load_timeout,
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.backend.dimension()
    }

    pub fn state(&self) -> ModelState {
        self.inner.state.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), ModelState::Ready)
    }

    /// Loads the model if nobody has yet; waits on the in-flight load
    /// otherwise. Returns once the model is ready. A previous failure is
    /// retried by the next warm-up caller.
    pub async fn warm_up(&self) -> Result<(), EmbedError> {
        loop {
            let notified = self.inner.changed.notified();
            let role = {
                let mut state = self.inner.state.lock();
                match &*state {
                    ModelState::Ready => LoadRole::Ready,
                    ModelState::Loading => LoadRole::Follower,
                    ModelState::Uninitialized | ModelState::Failed(_) => {
                        *state = ModelState::Loading;
                        LoadRole::Leader
                    }
                }
            };
            match role {
                LoadRole::Ready => return Ok(()),
                LoadRole::Leader => return self.perform_load().await,
                LoadRole::Follower => notified.await,
                LoadRole::Failed(_) => unreachable!("warm_up retries failed loads"),
            }
        }
    }

    /// Runs the backend load on a detached task. The leader may be
    /// cancelled (e.g. by `encode`'s timeout) without wedging the state
    /// machine: the detached task still finishes, flips the state to
    /// `Ready` or `Failed`, and wakes every waiter.
    async fn perform_load(&self) -> Result<(), EmbedError> {
        let inner = Arc::clone(&self.inner);
        let load = tokio::spawn(async move {
            debug!("loading embedding model");
            let result = inner.backend.load().await;
            let mut state = inner.state.lock();
            match &result {
                Ok(()) => {
                    *state = ModelState::Ready;
                    debug!("embedding model ready");
                }
                Err(err) => {
                    warn!(error = %err, "embedding model load failed");
                    *state = ModelState::Failed(err.to_string());
                }
            }
            drop(state);
            inner.changed.notify_waiters();
            result
        });
        match load.await {
            Ok(result) => result,
            Err(join_err) => {
                // A panicking backend load must not leave Loading stuck.
                let reason = format!("embedding load task aborted: {join_err}");
                let mut state = self.inner.state.lock();
                if matches!(&*state, ModelState::Loading) {
                    *state = ModelState::Failed(reason.clone());
                }
                drop(state);
                self.inner.changed.notify_waiters();
                Err(EmbedError::Backend(reason))
            }
        }
    }

    /// Waits for readiness without initiating a load on someone else's
    /// behalf mid-flight; an unwarmed model is loaded by this caller.
    async fn wait_ready(&self) -> Result<(), EmbedError> {
        loop {
            let notified = self.inner.changed.notified();
            let role = {
                let mut state = self.inner.state.lock();
                match &*state {
                    ModelState::Ready => LoadRole::Ready,
                    ModelState::Loading => LoadRole::Follower,
                    ModelState::Failed(reason) => LoadRole::Failed(reason.clone()),
                    ModelState::Uninitialized => {
                        *state = ModelState::Loading;
                        LoadRole::Leader
                    }
                }
            };
            match role {
                LoadRole::Ready => return Ok(()),
                LoadRole::Leader => return self.perform_load().await,
                LoadRole::Follower => notified.await,
                LoadRole::Failed(reason) => {
                    return Err(EmbedError::ModelUnavailable {
                        waited: Duration::ZERO,
                        reason: Some(reason),
                    });
                }
            }
        }
    }

    /// Embeds `text`, blocking on model load for at most the configured
    /// timeout if the model is not yet ready.
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let limit = self.inner.load_timeout;
        match tokio::time::timeout(limit, self.wait_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(EmbedError::ModelUnavailable { reason, .. })) => {
                return Err(EmbedError::ModelUnavailable {
                    waited: limit,
                    reason,
                });
            }
            Ok(Err(other)) => return Err(other),
            Err(_) => {
                return Err(EmbedError::ModelUnavailable {
                    waited: limit,
                    reason: None,
                });
            }
        }
        let vector = self.inner.backend.embed(text).await?;
        let expected = self.inner.backend.dimension();
        if vector.len() != expected {
            return Err(EmbedError::Dimension {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_blocks_until_loaded_then_succeeds() {
        let backend = Arc::new(MockEmbedder::new(16).with_load_delay(Duration::from_millis(20)));
        let shared = SharedEmbedder::new(backend.clone(), Duration::from_secs(1));
        assert!(!shared.is_ready());
        let vector = shared.encode("hello world").await.unwrap();
        assert_eq!(vector.len(), 16);
        assert!(shared.is_ready());
        assert_eq!(backend.load_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_warm_up_is_single_flight() {
        let backend = Arc::new(MockEmbedder::new(8).with_load_delay(Duration::from_millis(30)));
        let shared = SharedEmbedder::new(backend.clone(), Duration::from_secs(1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move { shared.warm_up().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(backend.load_count(), 1, "loads must not be duplicated");
    }

    #[tokio::test]
    async fn timed_out_first_caller_does_not_wedge_the_load() {
        let backend = Arc::new(MockEmbedder::new(8).with_load_delay(Duration::from_millis(100)));
        let shared = SharedEmbedder::new(backend.clone(), Duration::from_millis(20));

        let err = shared.encode("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable { .. }));

        // The detached load keeps running; warm_up joins it rather than
        // waiting on a load nobody is driving.
        tokio::time::timeout(Duration::from_millis(500), shared.warm_up())
            .await
            .expect("warm_up must not hang")
            .unwrap();
        assert!(shared.is_ready());
        assert_eq!(backend.load_count(), 1);

        let vector = shared.encode("text").await.unwrap();
        assert_eq!(vector.len(), 8);
    }

    #[tokio::test]
    async fn slow_load_times_out_with_model_unavailable() {
        let backend = Arc::new(MockEmbedder::new(8).with_load_delay(Duration::from_secs(5)));
        let shared = SharedEmbedder::new(backend, Duration::from_millis(30));
        let err = shared.encode("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn identical_input_embeds_identically() {
        let shared = SharedEmbedder::new(Arc::new(MockEmbedder::new(32)), Duration::from_secs(1));
        let a = shared.encode("retrieval augmented generation").await.unwrap();
        let b = shared.encode("retrieval augmented generation").await.unwrap();
        assert_eq!(a, b);
    }
}
