use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SearchError;

/// Global configuration for tablescout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for tablescout data (LMDB store and keyword index)
    pub data_dir: PathBuf,

    /// Embedding model configuration
    pub embedding: EmbeddingConfig,

    /// LLM used for reranking
    pub llm: LlmConfig,

    /// Fusion and reranking defaults
    pub search: SearchConfig,

    /// HTTP server configuration
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Where embeddings come from
    pub backend: EmbeddingBackend,

    /// Ollama host (ignored by the local backend)
    pub host: String,

    /// Model name (e.g., "dengcao/Qwen3-Embedding-0.6B:Q8_0")
    pub model: String,

    /// Dimensionality of the vectors the model produces
    pub dimensions: usize,

    /// Bound on a single embedding call
    pub timeout_secs: u64,

    /// Number of query embeddings kept in memory
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ollama,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama host serving the rerank model
    pub host: String,

    /// Model name (e.g., "gemma3:27b")
    pub model: String,

    /// Sampling temperature for scoring prompts
    pub temperature: f32,

    /// Bound on a single batch call
    pub timeout_secs: u64,

    /// Rerank batches scored at the same time
    pub max_concurrent_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// RRF constant
    pub rrf_k: u32,

    /// Weight of the description-vector ranking
    pub vector_weight: f64,

    /// Weight of the tags / BM25 ranking
    pub keyword_weight: f64,

    /// Candidates per LLM call
    pub rerank_batch_size: usize,

    /// Bound on a single retrieval source call
    pub retrieval_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration: defaults, then a TOML file, then environment overrides.
    ///
    /// Without an explicit path, `<data_dir>/config.toml` is read if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_file = Self::default().data_dir.join("config.toml");
                if default_file.exists() {
                    Self::from_file(&default_file)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply environment overrides through `lookup` (injected for testing)
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TABLESCOUT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.embedding.host = host;
        }
        if let Some(host) = lookup("OLLAMA_RERANK_HOST") {
            self.llm.host = host;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dims) = lookup("EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = dims
                .parse()
                .with_context(|| format!("EMBEDDING_DIMENSIONS is not a number: {}", dims))?;
        }
        if let Some(model) = lookup("RERANK_MODEL") {
            self.llm.model = model;
        }
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("API_PORT is not a port number: {}", port))?;
        }
        Ok(())
    }

    /// Reject settings the fusion and reranking code cannot work with
    pub fn validate(&self) -> std::result::Result<(), SearchError> {
        validate_weight("vector_weight", self.search.vector_weight)?;
        validate_weight("keyword_weight", self.search.keyword_weight)?;

        if self.search.rerank_batch_size == 0 {
            return Err(SearchError::config("rerank_batch_size must be at least 1"));
        }
        if self.llm.max_concurrent_batches == 0 {
            return Err(SearchError::config("max_concurrent_batches must be at least 1"));
        }
        if self.embedding.dimensions == 0 {
            return Err(SearchError::config("embedding dimensions must be at least 1"));
        }
        if self.embedding.timeout_secs == 0
            || self.llm.timeout_secs == 0
            || self.search.retrieval_timeout_secs == 0
        {
            return Err(SearchError::config("timeouts must be at least one second"));
        }
        Ok(())
    }

    /// Get the data directory, creating it if necessary
    pub fn data_dir(&self) -> Result<PathBuf> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(self.data_dir.clone())
    }

    /// LMDB environment holding table metadata and vectors
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("tables.db")
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.search.retrieval_timeout_secs)
    }
}

pub(crate) fn validate_weight(name: &str, weight: f64) -> std::result::Result<(), SearchError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(SearchError::config(format!(
            "{} must be a non-negative number, got {}",
            name, weight
        )));
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            data_dir: home.join(".tablescout"),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            host: "http://localhost:11434".to_string(),
            model: "dengcao/Qwen3-Embedding-0.6B:Q8_0".to_string(),
            dimensions: 1024,
            timeout_secs: 30,
            cache_capacity: 1024,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "gemma3:27b".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            max_concurrent_batches: 4,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: crate::fusion::DEFAULT_RRF_K,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            rerank_batch_size: crate::rerank::DEFAULT_BATCH_SIZE,
            retrieval_timeout_secs: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}
