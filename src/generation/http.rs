//! HTTP client for a text generation endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, GenerationParams, GenerationService};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Client for a generation service speaking a minimal JSON protocol:
/// `POST {endpoint}` with prompt and decoding parameters, response
/// `{"text"}`. HTTP status classifies the failure: 429 is rate limiting,
/// 5xx is transient, any other non-success is fatal.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let mut request = self.client.post(&self.endpoint).json(&GenerateRequest {
            model: &self.model,
            prompt,
            max_output_tokens: params.max_output_tokens,
            temperature: params.temperature,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // Connection resets and DNS failures are worth a retry.
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if status.is_server_error() {
            return Err(GenerationError::Transient(format!(
                "generation endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(GenerationError::Fatal(format!(
                "generation endpoint returned {status}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;
        Ok(body.text)
    }
}
