//! Embeddings from an Ollama server (`POST /api/embeddings`)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Embedder;
use crate::error::{Result, SearchError};

/// Default Ollama host URL
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an Ollama embedding model
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    host: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// The HTTP client is shared by every request made through this embedder
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Embedding(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }

    fn url(&self) -> String {
        format!("{}/api/embeddings", self.host)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.url();
        debug!(model = %self.model, chars = text.len(), "requesting embedding");

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SearchError::Embedding(format!("request to {} failed: {}", url, e)))?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Embedding(format!("malformed response from {}: {}", url, e)))?;

        if body.embedding.len() != self.dimensions {
            return Err(SearchError::Embedding(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                body.embedding.len(),
                self.dimensions
            )));
        }

        Ok(body.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
