//! Text generation backends for grounded replies.
//!
//! `GenerationBackend` takes a system instruction plus one user turn and
//! returns the raw model text. The Gemini implementation calls
//! `generateContent` once, bounded by the client timeout. Fallback wording is
//! the reply generator's job, not the backend's.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::ParleyConfig;
use crate::gemini::{self, API_KEY_HEADER, DEFAULT_GEMINI_BASE_URL};

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        user_content: &str,
    ) -> Result<String, GenerationError>;

    /// Model identifier recorded alongside generated messages.
    fn model(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response blocked: {0}")]
    Blocked(String),

    #[error("Missing API key")]
    MissingApiKey,
}

#[derive(Debug, Clone)]
pub struct GeminiGenerationConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GeminiGenerationConfig {
    pub fn from_config(config: &ParleyConfig) -> Self {
        let section = &config.generation;
        Self {
            api_key: ParleyConfig::api_key(&section.api_key),
            model: section.model.clone(),
            timeout: Duration::from_secs(section.timeout_seconds),
            temperature: section.temperature,
            max_output_tokens: section.max_output_tokens,
        }
    }
}

pub fn create_generation_backend(
    config: &ParleyConfig,
) -> Result<Box<dyn GenerationBackend>, GenerationError> {
    Ok(Box::new(GeminiGenerationClient::new(
        GeminiGenerationConfig::from_config(config),
    )?))
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerateSettings,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateSettings {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

// ============================================================================
// GeminiGenerationClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiGenerationClient {
    client: Client,
    config: GeminiGenerationConfig,
    url: String,
}

impl GeminiGenerationClient {
    pub fn new(config: GeminiGenerationConfig) -> Result<Self, GenerationError> {
        Self::with_base_url(config, DEFAULT_GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(
        config: GeminiGenerationConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        if config.api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        let url = gemini::endpoint(&base_url, &config.model, "generateContent");

        Ok(Self { client, config, url })
    }
}

#[async_trait]
impl GenerationBackend for GeminiGenerationClient {
    async fn generate(
        &self,
        system_instruction: &str,
        user_content: &str,
    ) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_content }],
            }],
            generation_config: GenerateSettings {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = gemini::parse_api_error(status, error_body);
            tracing::error!(code = code, message = %message, "Gemini generation API error");
            return Err(GenerationError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;

        if body.candidates.is_empty() {
            if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(GenerationError::Blocked(reason));
            }
        }

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
