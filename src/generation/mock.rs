//! Scriptable generation backend for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GenerationError, GenerationParams, GenerationService};

enum Behavior {
    Scripted(Mutex<Vec<Result<String, GenerationError>>>),
    Hanging { delay: Duration, text: String },
}

/// Generation service that replays a script of outcomes in order.
///
/// Once the script is exhausted the last entry repeats, so a single
/// `Ok(...)` script behaves like an always-succeeding backend.
pub struct MockGenerationService {
    behavior: Behavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerationService {
    pub fn scripted(mut script: Vec<Result<String, GenerationError>>) -> Self {
        // Pop from the back; reverse once here.
        script.reverse();
        Self {
            behavior: Behavior::Scripted(Mutex::new(script)),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(text.into())])
    }

    /// Sleeps for `delay` before answering; used to exercise call timeouts.
    pub fn hanging(delay: Duration, text: String) -> Self {
        Self {
            behavior: Behavior::Hanging { delay, text },
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl GenerationService for MockGenerationService {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        match &self.behavior {
            Behavior::Scripted(script) => {
                let mut script = script.lock();
                if script.len() > 1 {
                    script.pop().unwrap_or(Err(GenerationError::Fatal(
                        "empty script".into(),
                    )))
                } else {
                    script
                        .last()
                        .cloned()
                        .unwrap_or(Err(GenerationError::Fatal("empty script".into())))
                }
            }
            Behavior::Hanging { delay, text } => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
        }
    }
}
