//! Remote embedding provider using OpenAI-compatible APIs
//!
//! Posts to `{api_url}/embeddings` with a bearer key read from the
//! environment variable named in config. Rate limits and transport errors
//! are retried with exponential backoff. [`RemoteEmbedding::within_deadline`]
//! shrinks the per-attempt timeout and backoff so every attempt fits inside
//! the caller's own deadline.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};

const MAX_RETRIES: u32 = 3;

/// Share of the deadline given to each attempt; the rest covers backoff
const ATTEMPT_DIVISOR: u32 = 5;

/// Initial backoff as a share of the deadline
const BACKOFF_DIVISOR: u32 = 15;

/// Remote embedder using OpenAI-compatible HTTP APIs
#[derive(Debug)]
pub struct RemoteEmbedding {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    dimension: usize,
    attempt_timeout: Duration,
    initial_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl RemoteEmbedding {
    /// Create a remote embedder, reading the API key from `config.api_key_env`
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            StrataError::Configuration(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key, dimension)
    }

    /// Create a remote embedder with an explicit API key
    pub fn with_api_key(
        config: &EmbeddingConfig,
        api_key: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let attempt_timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| StrataError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let url = format!("{}/embeddings", config.api_url.trim_end_matches('/'));
        info!(
            "RemoteEmbedding initialized with model: {}, url: {}",
            config.model, url
        );

        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            api_key: api_key.into(),
            dimension,
            attempt_timeout,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay (doubles on each retry)
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Tighten attempt timeout and backoff so all retries finish within `deadline`
    ///
    /// Never loosens values that are already tighter.
    pub fn within_deadline(mut self, deadline: Duration) -> Self {
        self.attempt_timeout = self.attempt_timeout.min(deadline / ATTEMPT_DIVISOR);
        self.initial_backoff = self.initial_backoff.min(deadline / BACKOFF_DIVISOR);
        debug!(
            attempt_timeout_ms = self.attempt_timeout.as_millis() as u64,
            initial_backoff_ms = self.initial_backoff.as_millis() as u64,
            "Remote embedding retries bounded by {:?}",
            deadline
        );
        self
    }

    /// Longest time `embed` can take: every attempt timing out plus every backoff
    pub fn worst_case(&self) -> Duration {
        let mut total = self.attempt_timeout * MAX_RETRIES;
        let mut delay = self.initial_backoff;
        for _ in 1..MAX_RETRIES {
            total += delay;
            delay *= 2;
        }
        total
    }

    fn parse(&self, response: EmbeddingResponse) -> Result<Vec<f32>> {
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| StrataError::EmbeddingService("Empty embedding response".to_string()))?;

        if vector.len() != self.dimension {
            return Err(StrataError::EmbeddingService(format!(
                "Expected {}-dimensional embedding, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        debug!("Calling embeddings API at: {}", self.url);

        let mut last_error = None;
        let mut delay = self.initial_backoff;

        for attempt in 0..MAX_RETRIES {
            match self
                .client
                .post(&self.url)
                .timeout(self.attempt_timeout)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == 429 {
                        warn!(
                            "Rate limited on attempt {}/{}, waiting {:?}",
                            attempt + 1,
                            MAX_RETRIES,
                            delay
                        );
                        last_error = Some("rate limited".to_string());
                        if attempt < MAX_RETRIES - 1 {
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(StrataError::EmbeddingService(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                        StrataError::EmbeddingService(format!("Malformed response: {e}"))
                    })?;
                    return self.parse(parsed);
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt < MAX_RETRIES - 1 {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(StrataError::EmbeddingService(format!(
            "Failed after {} attempts: {}",
            MAX_RETRIES,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "remote"
    }
}
