//! OpenAI-compatible embedding client.
//!
//! Works against any server exposing `POST {base_url}/embeddings` with the
//! OpenAI request/response shape (OpenAI, Ollama, text-embeddings-inference).

use std::env;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embeddings::{Embedding, EmbeddingError, EmbeddingModel};
use crate::config::EmbeddingConfig;

/// Blocking embeddings client for OpenAI-compatible endpoints
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Build a client from config. The API key is read from the environment
    /// variable named by `api_key_env`; local servers may need none.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = client_builder(config)?.build()?;
        Self::with_client(config, client)
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, extra headers).
    pub fn with_client(config: &EmbeddingConfig, client: Client) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("missing embedding model name".to_string()));
        }
        if config.batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig("batch size must be positive".to_string()));
        }

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimension,
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request of at most `batch_size` inputs.
    fn request_batch(&self, inputs: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp
                            .json()
                            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != inputs.len() {
                            return Err(EmbeddingError::MalformedResponse(format!(
                                "{} embeddings for {} inputs",
                                parsed.data.len(),
                                inputs.len()
                            )));
                        }
                        let embeddings: Vec<Embedding> =
                            parsed.data.into_iter().map(|entry| entry.embedding).collect();
                        self.check_dimensions(&embeddings)?;
                        debug!(count = inputs.len(), "Embedded batch");
                        return Ok(embeddings);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(status = %status, attempt = attempt, "Embedding request failed, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbeddingError::Http(format!(
                        "embeddings request failed ({}): {}",
                        status, body
                    )));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt = attempt, "Embedding request error, retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Every vector must have the requested size, or at least agree with
    /// the rest of the batch when no size was requested.
    fn check_dimensions(&self, embeddings: &[Embedding]) -> Result<(), EmbeddingError> {
        let expected = match self.dimensions.or_else(|| embeddings.first().map(|e| e.len())) {
            Some(dim) => dim,
            None => return Ok(()),
        };
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected || e.is_empty()) {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected {}-dimensional embeddings, got {}",
                expected,
                bad.len()
            )));
        }
        Ok(())
    }
}

/// Client defaults: JSON content type, bearer auth when a key is configured.
pub(crate) fn client_builder(config: &EmbeddingConfig) -> Result<ClientBuilder, EmbeddingError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(var) = config.api_key_env.as_deref().filter(|v| !v.is_empty()) {
        let key = env::var(var).map_err(|_| EmbeddingError::MissingApiKey(var.to_string()))?;
        let auth = format!("Bearer {}", key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingError::InvalidConfig("invalid API key".to_string()))?,
        );
    }

    Ok(Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(5))
        .default_headers(headers))
}

impl EmbeddingModel for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.request_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::MalformedResponse("empty response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.request_batch(batch)?);
        }
        Ok(out)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
