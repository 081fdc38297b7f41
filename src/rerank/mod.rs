//! Batched LLM reranking
//!
//! Candidates are split into contiguous batches, each batch is scored by one
//! LLM call, and the combined results are sorted by relevance. A batch whose
//! call fails, times out or returns nothing parseable scores 0.0 for every
//! candidate in it; a candidate the model skipped scores 0.0 as well. The
//! output always holds exactly one result per input candidate.

mod llm;
mod parse;
mod prompt;

pub use llm::{LlmScorer, OllamaScorer};
pub use parse::{parse_scores, LlmScore, ParsedScores};
pub use prompt::build_prompt;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{timed_out, Result, SearchError};

/// Candidates sent to the LLM per call
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Batches in flight at once unless configured otherwise
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankCandidate {
    pub id: String,
    pub description: String,
}

impl RerankCandidate {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankedResult {
    pub id: String,
    /// In [0, 1]; 0.0 when the model gave no judgment
    pub relevance_score: f32,
}

/// Reranked results plus how much of the LLM signal was actually received
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RerankOutcome {
    /// Sorted by descending relevance
    pub results: Vec<RerankedResult>,
    pub batches: usize,
    /// Batches that fell back to all-zero scores
    pub degraded_batches: usize,
    /// Candidates in successful batches that the model left out
    pub unscored: usize,
}

impl RerankOutcome {
    /// True when some scores are fallback zeros rather than LLM judgments
    pub fn is_degraded(&self) -> bool {
        self.degraded_batches > 0 || self.unscored > 0
    }
}

struct BatchResult {
    results: Vec<RerankedResult>,
    failed: bool,
    unscored: usize,
}

impl BatchResult {
    fn zeros(batch: &[RerankCandidate]) -> Self {
        Self {
            results: batch
                .iter()
                .map(|c| RerankedResult {
                    id: c.id.clone(),
                    relevance_score: 0.0,
                })
                .collect(),
            failed: true,
            unscored: 0,
        }
    }
}

pub struct Reranker {
    scorer: Arc<dyn LlmScorer>,
    batch_size: usize,
    timeout: Duration,
    max_concurrent: usize,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn LlmScorer>, batch_size: usize, timeout: Duration) -> Result<Self> {
        if batch_size == 0 {
            return Err(SearchError::config("rerank batch size must be at least 1"));
        }
        Ok(Self {
            scorer,
            batch_size,
            timeout,
            max_concurrent: DEFAULT_MAX_CONCURRENT_BATCHES,
        })
    }

    /// Limit the number of batches scored at the same time (at least 1)
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn model_name(&self) -> &str {
        self.scorer.model_name()
    }

    /// Score every candidate against `query` and sort by relevance.
    ///
    /// Never fails: LLM problems only lower scores to 0.0. Equal scores keep
    /// their batch-then-input order.
    pub async fn rerank(
        &self,
        query: &str,
        context: &str,
        candidates: Vec<RerankCandidate>,
    ) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome::default();
        }

        let start = Instant::now();
        let batches: Vec<&[RerankCandidate]> = candidates.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        // `buffered` yields in submission order, whatever order the calls finish in
        let batch_results: Vec<BatchResult> = stream::iter(0..batch_count)
            .map(|index| self.score_batch(query, context, index, batches[index]))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut outcome = RerankOutcome {
            results: Vec::with_capacity(candidates.len()),
            batches: batch_count,
            degraded_batches: 0,
            unscored: 0,
        };
        for batch in batch_results {
            if batch.failed {
                outcome.degraded_batches += 1;
            }
            outcome.unscored += batch.unscored;
            outcome.results.extend(batch.results);
        }

        outcome.results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });

        info!(
            candidates = outcome.results.len(),
            batches = outcome.batches,
            degraded_batches = outcome.degraded_batches,
            unscored = outcome.unscored,
            elapsed = ?start.elapsed(),
            "rerank finished"
        );
        outcome
    }

    async fn score_batch(
        &self,
        query: &str,
        context: &str,
        index: usize,
        batch: &[RerankCandidate],
    ) -> BatchResult {
        let prompt = build_prompt(query, context, batch);

        let raw = match tokio::time::timeout(self.timeout, self.scorer.score(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(batch = index, size = batch.len(), error = %e, "rerank batch failed, scoring 0.0");
                return BatchResult::zeros(batch);
            }
            Err(_) => {
                let e = SearchError::LlmCall(timed_out("rerank batch", self.timeout));
                warn!(batch = index, size = batch.len(), error = %e, "rerank batch failed, scoring 0.0");
                return BatchResult::zeros(batch);
            }
        };

        let scores = match parse_scores(&raw) {
            ParsedScores::Parsed(scores) => scores,
            ParsedScores::Unparseable(reason) => {
                let e = SearchError::Parse(reason);
                warn!(batch = index, size = batch.len(), error = %e, "rerank batch unparseable, scoring 0.0");
                return BatchResult::zeros(batch);
            }
        };

        let mut by_id: HashMap<&str, f32> = HashMap::with_capacity(scores.len());
        for score in &scores {
            by_id.entry(score.id.as_str()).or_insert(score.score);
        }

        let mut unscored = 0;
        let results = batch
            .iter()
            .map(|candidate| {
                let relevance_score = by_id.get(candidate.id.as_str()).copied().unwrap_or_else(|| {
                    unscored += 1;
                    0.0
                });
                RerankedResult {
                    id: candidate.id.clone(),
                    relevance_score,
                }
            })
            .collect();

        if unscored > 0 {
            debug!(batch = index, unscored, "model skipped some candidates");
        }

        BatchResult {
            results,
            failed: false,
            unscored,
        }
    }
}
