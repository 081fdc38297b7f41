//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};

use crate::engine::{HybridMode, HybridOptions, HybridResult, ScoredTable};
use crate::rerank::{RerankOutcome, RerankedResult};
use crate::search::DistanceMetric;

pub const DEFAULT_RERANK_PROMPT: &str = "Find the most relevant database tables for this query";

const MAX_SEARCH_TOP_N: i64 = 10_000;
const MAX_HYBRID_TOP_N: i64 = 100;
const MAX_RRF_K: i64 = 100;

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<usize, String> {
    if value < min || value > max {
        return Err(format!("{} must be between {} and {}, got {}", name, min, max, value));
    }
    Ok(value as usize)
}

fn check_weight(name: &str, value: f64) -> Result<f64, String> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} must be between 0.0 and 1.0, got {}", name, value));
    }
    Ok(value)
}

fn check_query(query: &str) -> Result<(), String> {
    if query.trim().is_empty() {
        return Err("query must not be empty".to_string());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_top_n")]
    pub top_n: i64,
    #[serde(default)]
    pub method: DistanceMetric,
}

fn default_search_top_n() -> i64 {
    10
}

impl SearchRequest {
    pub fn validated_top_n(&self) -> Result<usize, String> {
        check_query(&self.query)?;
        check_range("top_n", self.top_n, 1, MAX_SEARCH_TOP_N)
    }
}

#[derive(Debug, Deserialize)]
pub struct RerankRequest {
    pub query: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_rerank_top_n")]
    pub top_n: i64,
    #[serde(default)]
    pub method: DistanceMetric,
}

fn default_prompt() -> String {
    DEFAULT_RERANK_PROMPT.to_string()
}

fn default_rerank_top_n() -> i64 {
    50
}

impl RerankRequest {
    pub fn validated_top_n(&self) -> Result<usize, String> {
        check_query(&self.query)?;
        check_range("top_n", self.top_n, 1, MAX_SEARCH_TOP_N)
    }
}

#[derive(Debug, Deserialize)]
pub struct HybridSearchRequest {
    pub query: String,
    #[serde(default = "default_search_top_n")]
    pub top_n: i64,
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_weight")]
    pub tags_weight: f64,
    #[serde(default)]
    pub method: DistanceMetric,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: i64,
}

fn default_weight() -> f64 {
    0.5
}

fn default_rrf_k() -> i64 {
    crate::fusion::DEFAULT_RRF_K as i64
}

impl HybridSearchRequest {
    pub fn options(&self, mode: HybridMode) -> Result<HybridOptions, String> {
        check_query(&self.query)?;
        Ok(HybridOptions {
            top_n: check_range("top_n", self.top_n, 1, MAX_HYBRID_TOP_N)?,
            metric: self.method,
            vector_weight: check_weight("vector_weight", self.vector_weight)?,
            keyword_weight: check_weight("tags_weight", self.tags_weight)?,
            rrf_k: check_range("rrf_k", self.rrf_k, 1, MAX_RRF_K)? as u32,
            mode,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TableScore {
    pub table_name: String,
    pub score: f32,
}

impl From<ScoredTable> for TableScore {
    fn from(table: ScoredTable) -> Self {
        Self {
            table_name: table.table_name,
            score: table.score,
        }
    }
}

impl From<RerankedResult> for TableScore {
    fn from(result: RerankedResult) -> Self {
        Self {
            table_name: result.id,
            score: result.relevance_score,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<TableScore>,
    pub total: usize,
}

impl From<Vec<ScoredTable>> for SearchResponse {
    fn from(tables: Vec<ScoredTable>) -> Self {
        let results: Vec<TableScore> = tables.into_iter().map(TableScore::from).collect();
        Self {
            total: results.len(),
            results,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<TableScore>,
    pub total: usize,
    /// Some scores are fallback zeros because the LLM failed or skipped tables
    pub degraded: bool,
}

impl From<RerankOutcome> for RerankResponse {
    fn from(outcome: RerankOutcome) -> Self {
        let degraded = outcome.is_degraded();
        let results: Vec<TableScore> = outcome.results.into_iter().map(TableScore::from).collect();
        Self {
            total: results.len(),
            results,
            degraded,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HybridSearchResult {
    pub table_name: String,
    pub rrf_score: f64,
    pub vector_rank: Option<u32>,
    /// Rank from the tags source, or the BM25 source on `/search_hybrid_bm25`
    pub tags_rank: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    pub results: Vec<HybridSearchResult>,
    pub total: usize,
}

impl From<Vec<HybridResult>> for HybridSearchResponse {
    fn from(fused: Vec<HybridResult>) -> Self {
        let results: Vec<HybridSearchResult> = fused
            .into_iter()
            .map(|r| HybridSearchResult {
                table_name: r.table_name,
                rrf_score: r.rrf_score,
                vector_rank: r.vector_rank,
                tags_rank: r.keyword_rank,
            })
            .collect();
        Self {
            total: results.len(),
            results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hybrid(json: &str) -> HybridSearchRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let request: RerankRequest = serde_json::from_str(r#"{"query": "q"}"#).unwrap();
        assert_eq!(request.prompt, DEFAULT_RERANK_PROMPT);
        assert_eq!(request.top_n, 50);
        assert_eq!(request.method, DistanceMetric::Cosine);

        let options = hybrid(r#"{"query": "q"}"#).options(HybridMode::Bm25).unwrap();
        assert_eq!(options.top_n, 10);
        assert_eq!(options.rrf_k, 60);
        assert_eq!(options.vector_weight, 0.5);
        assert_eq!(options.mode, HybridMode::Bm25);
    }

    #[test]
    fn test_method_names() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"query": "q", "method": "dot_product"}"#).unwrap();
        assert_eq!(request.method, DistanceMetric::DotProduct);
        assert!(serde_json::from_str::<SearchRequest>(r#"{"query": "q", "method": "manhattan"}"#).is_err());
    }

    #[test]
    fn test_ranges() {
        assert!(hybrid(r#"{"query": "q", "top_n": 101}"#).options(HybridMode::Tags).is_err());
        assert!(hybrid(r#"{"query": "q", "rrf_k": 0}"#).options(HybridMode::Tags).is_err());
        assert!(hybrid(r#"{"query": "q", "tags_weight": 1.5}"#).options(HybridMode::Tags).is_err());
        assert!(hybrid(r#"{"query": " "}"#).options(HybridMode::Tags).is_err());

        let search: SearchRequest = serde_json::from_str(r#"{"query": "q", "top_n": -3}"#).unwrap();
        assert!(search.validated_top_n().is_err());
        let search: SearchRequest = serde_json::from_str(r#"{"query": "q", "top_n": 10000}"#).unwrap();
        assert_eq!(search.validated_top_n(), Ok(10_000));
    }
}
