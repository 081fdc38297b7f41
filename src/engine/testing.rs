//! In-memory collaborators for engine and server tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::SearchEngine;
use crate::embed::{Embedder, EmbeddingService};
use crate::error::{Result, SearchError};
use crate::fusion::CandidateRank;
use crate::rerank::LlmScorer;
use crate::search::{rank_in_order, DistanceMetric, RetrievalQuery, RetrievalSource};
use crate::vectordb::MetadataStore;

pub(crate) struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

pub(crate) struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(SearchError::Embedding("connection refused".into()))
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

/// Returns a fixed list (truncated to the limit) and records the limits asked for
pub(crate) struct ListSource {
    name: &'static str,
    hits: Vec<(&'static str, f32)>,
    fail: bool,
    pub(crate) limits: Mutex<Vec<usize>>,
}

impl ListSource {
    pub(crate) fn new(name: &'static str, hits: Vec<(&'static str, f32)>) -> Arc<Self> {
        Arc::new(Self {
            name,
            hits,
            fail: false,
            limits: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            hits: vec![],
            fail: true,
            limits: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RetrievalSource for ListSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, _query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>> {
        self.limits.lock().unwrap().push(limit);
        if self.fail {
            return Err(SearchError::retrieval(self.name, "index unavailable"));
        }
        Ok(rank_in_order(
            self.hits
                .iter()
                .take(limit)
                .map(|(id, score)| (id.to_string(), *score)),
        ))
    }
}

pub(crate) struct MapMetadata(HashMap<String, String>);

#[async_trait]
impl MetadataStore for MapMetadata {
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.0.get(id).map(|d| (id.clone(), d.clone())))
            .collect())
    }
}

/// Scores tables by a lookup table; unknown tables are left out of the answer
pub(crate) struct TableScorer {
    scores: HashMap<&'static str, f32>,
    fail: bool,
}

impl TableScorer {
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            scores: HashMap::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl LlmScorer for TableScorer {
    async fn score(&self, prompt: &str) -> Result<String> {
        if self.fail {
            return Err(SearchError::LlmCall("model not loaded".into()));
        }
        let entries: Vec<serde_json::Value> = prompt
            .lines()
            .filter_map(|line| line.split_once(". Table: ").map(|(_, id)| id))
            .filter_map(|id| {
                self.scores
                    .get(id)
                    .map(|s| serde_json::json!({ "table_name": id, "score": s }))
            })
            .collect();
        Ok(serde_json::Value::Array(entries).to_string())
    }

    fn model_name(&self) -> &str {
        "table-scorer"
    }
}

/// Metadata with a description for each of `ids`
pub(crate) fn metadata(ids: &[&str]) -> Arc<MapMetadata> {
    Arc::new(MapMetadata(
        ids.iter()
            .map(|id| (id.to_string(), format!("about {}", id)))
            .collect(),
    ))
}

pub(crate) fn embeddings(embedder: Arc<dyn Embedder>) -> Arc<EmbeddingService> {
    Arc::new(EmbeddingService::new(embedder, 16, Duration::from_secs(5)))
}

pub(crate) fn scorer(scores: &[(&'static str, f32)]) -> Arc<TableScorer> {
    Arc::new(TableScorer {
        scores: scores.iter().copied().collect(),
        fail: false,
    })
}

/// Engine with a cosine vector source and one source serving as both tags and BM25
pub(crate) fn engine_with(
    vector: Arc<ListSource>,
    tags: Arc<ListSource>,
    metadata: Arc<MapMetadata>,
    scorer: Arc<TableScorer>,
) -> SearchEngine {
    SearchEngine::builder()
        .embeddings(embeddings(Arc::new(StaticEmbedder)))
        .vector_source(DistanceMetric::Cosine, vector)
        .tags_source(tags.clone())
        .keyword_source(tags)
        .metadata(metadata)
        .scorer(scorer)
        .build()
        .unwrap()
}
