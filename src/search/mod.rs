//! Retrieval coordination
//!
//! Runs the configured retrieval sources concurrently for one query, each
//! bounded by a timeout, and fuses their rankings. Any source failure or
//! timeout fails the whole query: a silently empty source would skew fused
//! scores with no visible sign.

mod metric;
mod sources;

pub use metric::{round_score, DistanceMetric};
pub use sources::{
    rank_in_order, DescriptionVectorSource, KeywordSource, RetrievalQuery, RetrievalSource,
    TagsVectorSource,
};

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{timed_out, Result, SearchError};
use crate::fusion::{self, CandidateRank, FusedResult, SourceRanking};

/// Lower bound on candidates fetched per source for fusion
pub const MIN_FUSION_CANDIDATES: usize = 100;

/// Candidates fetched per source for each requested result
pub const FUSION_CANDIDATE_MULTIPLIER: usize = 10;

/// Candidates to fetch from each source so fusion has enough overlap
pub fn candidate_pool_size(top_n: usize) -> usize {
    MIN_FUSION_CANDIDATES.max(top_n.saturating_mul(FUSION_CANDIDATE_MULTIPLIER))
}

/// A retrieval source paired with its fusion weight
#[derive(Clone)]
pub struct WeightedSource {
    pub source: Arc<dyn RetrievalSource>,
    pub weight: f64,
}

impl WeightedSource {
    pub fn new(source: Arc<dyn RetrievalSource>, weight: f64) -> Self {
        Self { source, weight }
    }
}

/// Issues retrieval queries and joins their results
#[derive(Debug, Clone, Copy)]
pub struct RetrievalCoordinator {
    timeout: Duration,
}

impl RetrievalCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Query a single source under the timeout
    pub async fn retrieve(
        &self,
        source: &dyn RetrievalSource,
        query: &RetrievalQuery,
        limit: usize,
    ) -> Result<Vec<CandidateRank>> {
        let start = Instant::now();
        let candidates = tokio::time::timeout(self.timeout, source.query(query, limit))
            .await
            .map_err(|_| {
                SearchError::retrieval(source.name(), timed_out("query", self.timeout))
            })??;

        debug!(
            source = source.name(),
            candidates = candidates.len(),
            elapsed = ?start.elapsed(),
            "retrieval source answered"
        );
        Ok(candidates)
    }

    /// Query every source concurrently; the first failure fails the call
    pub async fn retrieve_all(
        &self,
        sources: &[WeightedSource],
        query: &RetrievalQuery,
        limit: usize,
    ) -> Result<Vec<SourceRanking>> {
        let calls = sources.iter().map(|weighted| async move {
            let candidates = self.retrieve(weighted.source.as_ref(), query, limit).await?;
            Ok::<_, SearchError>(SourceRanking::from_candidates(
                weighted.source.name(),
                weighted.weight,
                &candidates,
            ))
        });

        try_join_all(calls).await
    }

    /// Retrieve from every source and fuse the rankings, keeping the best `top_n`
    pub async fn fused_search(
        &self,
        sources: &[WeightedSource],
        query: &RetrievalQuery,
        top_n: usize,
        rrf_k: u32,
    ) -> Result<Vec<FusedResult>> {
        let rankings = self
            .retrieve_all(sources, query, candidate_pool_size(top_n))
            .await?;

        let refs: Vec<&SourceRanking> = rankings.iter().collect();
        let mut fused = fusion::fuse(&refs, rrf_k)?;
        fused.truncate(top_n);
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source returning fixed ids after a delay
    struct FixedSource {
        name: &'static str,
        ids: Vec<&'static str>,
        delay: Duration,
        fail: bool,
        seen_limit: AtomicUsize,
    }

    impl FixedSource {
        fn new(name: &'static str, ids: Vec<&'static str>) -> Self {
            Self {
                name,
                ids,
                delay: Duration::ZERO,
                fail: false,
                seen_limit: AtomicUsize::new(0),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl RetrievalSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn query(&self, _query: &RetrievalQuery, limit: usize) -> Result<Vec<CandidateRank>> {
            self.seen_limit.store(limit, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(SearchError::retrieval(self.name, "backend down"));
            }
            Ok(rank_in_order(
                self.ids.iter().take(limit).map(|id| (id.to_string(), 0.0)),
            ))
        }
    }

    fn query() -> RetrievalQuery {
        RetrievalQuery::new("school data", vec![0.1, 0.2])
    }

    #[test]
    fn test_candidate_pool_size() {
        assert_eq!(candidate_pool_size(1), 100);
        assert_eq!(candidate_pool_size(10), 100);
        assert_eq!(candidate_pool_size(11), 110);
        assert_eq!(candidate_pool_size(50), 500);
    }

    #[tokio::test]
    async fn test_fused_search_merges_sources() {
        let vector = Arc::new(FixedSource::new("vector", vec!["t1", "t2"]));
        let keyword = Arc::new(FixedSource::new("bm25", vec!["t2", "t3"]));
        let sources = vec![
            WeightedSource::new(vector.clone(), 0.5),
            WeightedSource::new(keyword.clone(), 0.5),
        ];

        let coordinator = RetrievalCoordinator::new(Duration::from_secs(5));
        let fused = coordinator
            .fused_search(&sources, &query(), 10, 60)
            .await
            .unwrap();

        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t3"]);
        assert_eq!(fused[0].rank_in("vector"), Some(2));
        assert_eq!(fused[0].rank_in("bm25"), Some(1));
        assert_eq!(vector.seen_limit.load(Ordering::SeqCst), 100);
        assert_eq!(keyword.seen_limit.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_fused_search_truncates_to_top_n() {
        let sources = vec![
            WeightedSource::new(Arc::new(FixedSource::new("a", vec!["t1", "t2", "t3"])), 1.0),
            WeightedSource::new(Arc::new(FixedSource::new("b", vec!["t4"])), 1.0),
        ];
        let coordinator = RetrievalCoordinator::new(Duration::from_secs(5));
        let fused = coordinator.fused_search(&sources, &query(), 2, 60).await.unwrap();
        assert_eq!(fused.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_run_concurrently() {
        let sources = vec![
            WeightedSource::new(
                Arc::new(FixedSource::new("a", vec!["t1"]).delayed(Duration::from_secs(3))),
                0.5,
            ),
            WeightedSource::new(
                Arc::new(FixedSource::new("b", vec!["t2"]).delayed(Duration::from_secs(3))),
                0.5,
            ),
        ];
        let coordinator = RetrievalCoordinator::new(Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let rankings = coordinator.retrieve_all(&sources, &query(), 10).await.unwrap();

        assert_eq!(rankings.len(), 2);
        // Sequential execution would take 6s and hit the 5s timeout
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_failing_source_fails_the_query() {
        let sources = vec![
            WeightedSource::new(Arc::new(FixedSource::new("vector", vec!["t1"])), 0.5),
            WeightedSource::new(Arc::new(FixedSource::new("bm25", vec![]).failing()), 0.5),
        ];
        let coordinator = RetrievalCoordinator::new(Duration::from_secs(5));

        let err = coordinator
            .fused_search(&sources, &query(), 10, 60)
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::retrieval("bm25", "backend down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_source_fails_the_query() {
        let sources = vec![
            WeightedSource::new(Arc::new(FixedSource::new("vector", vec!["t1"])), 0.5),
            WeightedSource::new(
                Arc::new(FixedSource::new("tags", vec!["t2"]).delayed(Duration::from_secs(60))),
                0.5,
            ),
        ];
        let coordinator = RetrievalCoordinator::new(Duration::from_secs(1));

        let err = coordinator
            .fused_search(&sources, &query(), 10, 60)
            .await
            .unwrap_err();
        match err {
            SearchError::Retrieval { source_name, message } => {
                assert_eq!(source_name, "tags");
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
