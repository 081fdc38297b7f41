mod cache;
mod embedder;
mod ollama;

pub use cache::{CacheStats, QueryCache};
pub use embedder::{FastEmbedder, ModelType};
pub use ollama::{OllamaEmbedder, DEFAULT_OLLAMA_HOST};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{timed_out, Result, SearchError};

/// Converts text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder produces
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// High-level embedding service: timeout, dimension check and query cache
/// around any `Embedder`
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: QueryCache,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, cache_capacity: u64, timeout: Duration) -> Self {
        Self {
            embedder,
            cache: QueryCache::new(cache_capacity),
            timeout,
        }
    }

    /// Build the embedder selected by the configuration
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let embedder: Arc<dyn Embedder> = match config.backend {
            EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
                config.host.clone(),
                config.model.clone(),
                config.dimensions,
                timeout,
            )?),
            EmbeddingBackend::Local => {
                let model_type = ModelType::from_name(&config.model).ok_or_else(|| {
                    SearchError::config(format!("unknown local embedding model '{}'", config.model))
                })?;
                if model_type.dimensions() != config.dimensions {
                    return Err(SearchError::config(format!(
                        "{} produces {} dimensions but embedding.dimensions is {}",
                        model_type.name(),
                        model_type.dimensions(),
                        config.dimensions
                    ))
                    .into());
                }
                Arc::new(FastEmbedder::with_model(model_type)?)
            }
        };

        Ok(Self::new(embedder, config.cache_capacity, timeout))
    }

    /// Embed a search query, served from the cache when possible
    pub async fn embed_query(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(hit) = self.cache.get(query) {
            debug!("query embedding cache hit");
            return Ok(hit);
        }

        let embedding = Arc::new(self.embed_uncached(query).await?);
        self.cache.insert(query, Arc::clone(&embedding));
        Ok(embedding)
    }

    /// Embed a document (table description or keywords); never cached
    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_uncached(text).await
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = tokio::time::timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|_| SearchError::Embedding(timed_out("embedding", self.timeout)))??;

        if embedding.len() != self.embedder.dimensions() {
            return Err(SearchError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.embedder.dimensions(),
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    /// Get embedding dimensions
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Get model information
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
