use anyhow::anyhow;
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use super::Embedder;
use crate::error::{Result, SearchError};
use crate::info_print;

/// Available local embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// BGE Small EN v1.5 - 384 dimensions, good balance of speed/quality
    BGESmallENV15,
    /// All-MiniLM-L6-v2 - 384 dimensions, fast and efficient
    AllMiniLML6V2,
    /// BGE Base EN v1.5 - 768 dimensions, higher quality
    BGEBaseENV15,
    /// Multilingual E5 small - 384 dimensions, handles non-English catalogues
    MultilingualE5Small,
}

impl ModelType {
    pub fn to_fastembed_model(&self) -> FastEmbedModel {
        match self {
            Self::BGESmallENV15 => FastEmbedModel::BGESmallENV15,
            Self::AllMiniLML6V2 => FastEmbedModel::AllMiniLML6V2,
            Self::BGEBaseENV15 => FastEmbedModel::BGEBaseENV15,
            Self::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::BGESmallENV15 => 384,
            Self::AllMiniLML6V2 => 384,
            Self::BGEBaseENV15 => 768,
            Self::MultilingualE5Small => 384,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BGESmallENV15 => "BAAI/bge-small-en-v1.5",
            Self::AllMiniLML6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BGEBaseENV15 => "BAAI/bge-base-en-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Parse a short model name (e.g. "bge-small") or a full model id
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bge-small" => Some(Self::BGESmallENV15),
            "minilm-l6" => Some(Self::AllMiniLML6V2),
            "bge-base" => Some(Self::BGEBaseENV15),
            "e5-multilingual" => Some(Self::MultilingualE5Small),
            other => [
                Self::BGESmallENV15,
                Self::AllMiniLML6V2,
                Self::BGEBaseENV15,
                Self::MultilingualE5Small,
            ]
            .into_iter()
            .find(|m| m.name() == other),
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        Self::BGESmallENV15
    }
}

/// Local embedding model using the fastembed library
///
/// Inference runs on the blocking thread pool; the model itself is not
/// reentrant, so calls are serialized behind a mutex.
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_type: ModelType,
}

impl FastEmbedder {
    /// Load (downloading on first use) the given model
    pub fn with_model(model_type: ModelType) -> anyhow::Result<Self> {
        info_print!("📦 Loading embedding model: {}", model_type.name());
        info_print!("   Dimensions: {}", model_type.dimensions());

        let model = TextEmbedding::try_new(
            InitOptions::new(model_type.to_fastembed_model()).with_show_download_progress(true),
        )
        .map_err(|e| anyhow!("Failed to initialize embedding model: {}", e))?;

        info_print!("✅ Model loaded successfully!");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_type,
        })
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| SearchError::Embedding("embedding model lock poisoned".into()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| SearchError::Embedding(format!("Failed to generate embedding: {}", e)))
        })
        .await
        .map_err(|e| SearchError::Embedding(format!("embedding task failed: {}", e)))??;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Embedding("No embedding generated".into()))
    }

    fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    fn model_name(&self) -> &str {
        self.model_type.name()
    }
}
