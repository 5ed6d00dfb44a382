//! Query embeddings for knowledge retrieval.
//!
//! The retriever only ever embeds customer messages, so the Gemini client here
//! is tuned for that: input is whitespace-collapsed and capped before sending,
//! vectors come back L2-normalised, and retries are off unless configured
//! (`max_retries`). When enabled, only rate limits, server faults and transport
//! errors are retried.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::config::ParleyConfig;
use crate::gemini::{self, API_KEY_HEADER, DEFAULT_GEMINI_BASE_URL};

/// Gemini embedding input tops out at 2048 tokens; four chars per token keeps
/// long messages under it.
pub const MAX_INPUT_CHARS: usize = 8192;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embedding for a search query. Defaults to `embed`; backends with
    /// asymmetric task types override it.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Nothing to embed")]
    EmptyInput,

    #[error("Missing API key")]
    MissingApiKey,
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(_) => true,
            EmbeddingError::Api { code, .. } => gemini::is_retryable_status(*code),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiEmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GeminiEmbeddingConfig {
    pub fn from_config(config: &ParleyConfig) -> Self {
        let section = &config.embedding;
        Self {
            api_key: ParleyConfig::api_key(&section.api_key),
            model: section.model.clone(),
            dimensions: section.dimensions as usize,
            timeout: Duration::from_secs(section.timeout_seconds),
            max_retries: section.max_retries as usize,
            retry_delay_ms: section.retry_delay_ms,
        }
    }
}

pub fn create_embedding_backend(
    config: &ParleyConfig,
) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    let client = GeminiEmbeddingClient::new(GeminiEmbeddingConfig::from_config(config))?;
    tracing::info!(
        model = %config.embedding.model,
        dimensions = config.embedding.dimensions,
        "Embedding backend ready"
    );
    Ok(Box::new(client))
}

/// Collapse runs of whitespace and cap the length. `None` when nothing is left.
pub fn prepare_input(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_INPUT_CHARS).collect())
}

/// Scale to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    task_type: TaskType,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: GeminiEmbeddingConfig,
    url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: GeminiEmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, DEFAULT_GEMINI_BASE_URL.to_string())
    }

    /// Point the client at another host (tests, proxies).
    pub fn with_base_url(
        config: GeminiEmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        let url = gemini::endpoint(&base_url, &config.model, "embedContent");
        Ok(Self { client, config, url })
    }

    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let input = prepare_input(text).ok_or(EmbeddingError::EmptyInput)?;
        let strategy = FixedInterval::from_millis(self.config.retry_delay_ms).take(self.config.max_retries);

        RetryIf::spawn(
            strategy,
            || self.request(&input, task_type),
            EmbeddingError::is_retryable,
        )
        .await
        .map_err(|e| {
            tracing::warn!(model = %self.config.model, error = %e, "Embedding request failed");
            e
        })
    }

    async fn request(&self, input: &str, task_type: TaskType) -> Result<Vec<f32>, EmbeddingError> {
        let body = EmbedRequest {
            model: format!("models/{}", self.config.model),
            content: EmbedContent {
                parts: [EmbedPart { text: input }],
            },
            task_type,
            output_dimensionality: self.config.dimensions,
        };

        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = gemini::parse_api_error(status, text);
            return Err(EmbeddingError::Api { code, message });
        }

        let mut values = response.json::<EmbedResponse>().await?.embedding.values;
        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }
        // Reduced-dimensionality outputs are not unit length.
        l2_normalize(&mut values);
        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
