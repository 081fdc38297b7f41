//! Retrieval sources: thin adapters turning store lookups into ranked candidates

use async_trait::async_trait;
use std::sync::Arc;

use super::DistanceMetric;
use crate::error::{Result, SearchError};
use crate::fts::KeywordIndex;
use crate::fusion::CandidateRank;
use crate::vectordb::TableStore;

/// A query as seen by retrieval sources: the raw text plus its embedding
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub embedding: Arc<Vec<f32>>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            embedding: Arc::new(embedding),
        }
    }
}

/// Something that ranks tables for a query
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Stable name, used as the source label in fused results
    fn name(&self) -> &str;

    /// Return at most `limit` candidates, ranked 1..=n in the source's native order
    async fn query(&self, query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>>;
}

/// Assign dense 1-indexed ranks in the given order
pub fn rank_in_order<I>(hits: I) -> Vec<CandidateRank>
where
    I: IntoIterator<Item = (String, f32)>,
{
    hits.into_iter()
        .enumerate()
        .map(|(idx, (id, score))| CandidateRank {
            id,
            rank: idx as u32 + 1,
            score: Some(score),
        })
        .collect()
}

/// Run a blocking store call off the async runtime
async fn blocking<T, F>(source_name: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SearchError::retrieval(source_name, format!("{:#}", e))),
        Err(e) => Err(SearchError::retrieval(source_name, e)),
    }
}

/// Nearest neighbours over table description embeddings
pub struct DescriptionVectorSource {
    store: Arc<TableStore>,
    metric: DistanceMetric,
}

impl DescriptionVectorSource {
    pub fn new(store: Arc<TableStore>, metric: DistanceMetric) -> Self {
        Self { store, metric }
    }
}

#[async_trait]
impl RetrievalSource for DescriptionVectorSource {
    fn name(&self) -> &str {
        "vector"
    }

    async fn query(&self, query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>> {
        let store = Arc::clone(&self.store);
        let embedding = Arc::clone(&query.embedding);
        let metric = self.metric;

        let hits = blocking(self.name(), move || store.nearest(metric, &embedding, limit)).await?;

        Ok(rank_in_order(
            hits.into_iter()
                .map(|(name, distance)| (name, metric.normalize(distance))),
        ))
    }
}

/// Nearest neighbours over tag/keyword embeddings (cosine)
pub struct TagsVectorSource {
    store: Arc<TableStore>,
}

impl TagsVectorSource {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetrievalSource for TagsVectorSource {
    fn name(&self) -> &str {
        "tags"
    }

    async fn query(&self, query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>> {
        let store = Arc::clone(&self.store);
        let embedding = Arc::clone(&query.embedding);

        let hits = blocking(self.name(), move || store.nearest_tags(&embedding, limit)).await?;

        Ok(rank_in_order(hits.into_iter().map(|(name, distance)| {
            (name, DistanceMetric::Cosine.normalize(distance))
        })))
    }
}

/// BM25 full-text relevance over table keywords
pub struct KeywordSource {
    index: Arc<KeywordIndex>,
}

impl KeywordSource {
    pub fn new(index: Arc<KeywordIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalSource for KeywordSource {
    fn name(&self) -> &str {
        "bm25"
    }

    async fn query(&self, query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>> {
        let index = Arc::clone(&self.index);
        let text = query.text.clone();

        let hits = blocking(self.name(), move || index.search(&text, limit)).await?;

        Ok(rank_in_order(hits.into_iter().map(|hit| (hit.table_name, hit.score))))
    }
}
