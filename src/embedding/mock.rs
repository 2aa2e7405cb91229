//! Deterministic in-process embedder for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{EmbedError, Embedder};

/// Hash-bucketed bag-of-words embedder.
///
/// Each lowercased alphanumeric token is hashed into one of `dimension`
/// buckets and the resulting count vector is L2-normalized. Texts that
/// share vocabulary land close in cosine space, which makes retrieval
/// behavior controllable from test fixtures without a real model.
pub struct MockEmbedder {
    dimension: usize,
    load_delay: Duration,
    loads: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }

    /// Simulated model-load latency, for exercising warm-up paths.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// How many times `load` has run to completion.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn load(&self) -> Result<(), EmbedError> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(hash_vector(text, self.dimension))
    }
}

fn hash_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut v = vec![0f32; dimension];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        // FNV-1a; stable across platforms and runs.
        let mut h: u64 = 0xcbf29ce484222325;
        for b in token.bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % dimension as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = MockEmbedder::new(64);
        let v = embedder.embed("distributed consensus protocols").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher_than_disjoint() {
        let embedder = MockEmbedder::new(64);
        let base = embedder.embed("neural network training loss").await.unwrap();
        let near = embedder
            .embed("neural network training convergence")
            .await
            .unwrap();
        let far = embedder.embed("medieval castle architecture").await.unwrap();
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }
}
