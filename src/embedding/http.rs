//! HTTP-backed embedder for a sentence-transformer serving endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{EmbedError, Embedder};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Client for an embedding service speaking a minimal JSON protocol:
/// `POST {endpoint}` with `{"model", "input"}`, response `{"embedding"}`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
        }
    }

    async fn request(&self, input: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|e| EmbedError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EmbedError::Backend(format!(
                "embedding service returned {}",
                response.status()
            )));
        }
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Backend(e.to_string()))?;
        Ok(body.embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Probes the service with a one-token input so dimension mismatches
    /// and unreachable endpoints surface at warm-up, not mid-ingestion.
    #[instrument(skip(self), fields(model = %self.model))]
    async fn load(&self) -> Result<(), EmbedError> {
        let probe = self.request("ready").await?;
        if probe.len() != self.dimension {
            return Err(EmbedError::Dimension {
                expected: self.dimension,
                actual: probe.len(),
            });
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.request(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn load_probe_verifies_dimension() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(200)
                    .json_body(serde_json::json!({ "embedding": [0.1, 0.2, 0.3] }));
            })
            .await;

        let embedder = HttpEmbedder::new(server.url("/embed"), "mini-lm", 3);
        embedder.load().await.unwrap();
        mock.assert_async().await;

        let wrong_dim = HttpEmbedder::new(server.url("/embed"), "mini-lm", 384);
        let err = wrong_dim.load().await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::Dimension {
                expected: 384,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn service_errors_surface_as_backend_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(503);
            })
            .await;

        let embedder = HttpEmbedder::new(server.url("/embed"), "mini-lm", 3);
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::Backend(_)));
    }
}
