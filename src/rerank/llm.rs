//! LLM scoring collaborator and its Ollama implementation (`POST /api/generate`)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SearchError};

/// Sends one prompt to a language model and returns its raw text answer
#[async_trait]
pub trait LlmScorer: Send + Sync {
    async fn score(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone)]
pub struct OllamaScorer {
    client: Client,
    host: String,
    model: String,
    temperature: f32,
}

impl OllamaScorer {
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::LlmCall(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
        })
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.host)
    }
}

#[async_trait]
impl LlmScorer for OllamaScorer {
    async fn score(&self, prompt: &str) -> Result<String> {
        let url = self.url();
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting LLM scores");

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SearchError::LlmCall(format!("request to {} failed: {}", url, e)))?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SearchError::LlmCall(format!("unexpected body from {}: {}", url, e)))?;

        Ok(body.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
