//! Reciprocal Rank Fusion (RRF)
//!
//! Merges independently ranked candidate lists into one consensus ranking:
//! `score(id) = Σ weight_i / (k + rank_i)` over every source that returned `id`.
//! Ranks are 1-indexed, so `k + rank >= 1` for any `k`.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::validate_weight;
use crate::error::{Result, SearchError};

/// Default RRF constant
pub const DEFAULT_RRF_K: u32 = 60;

/// One candidate as ranked by a single retrieval source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRank {
    pub id: String,
    /// 1 = best
    pub rank: u32,
    /// Native score reported by the source, if any
    pub score: Option<f32>,
}

/// The ranking produced by one source for one query, with its fusion weight
#[derive(Debug, Clone)]
pub struct SourceRanking {
    name: String,
    weight: f64,
    ranks: HashMap<String, u32>,
}

impl SourceRanking {
    /// Build from an explicit id -> rank mapping
    pub fn new(name: impl Into<String>, weight: f64, ranks: HashMap<String, u32>) -> Self {
        Self {
            name: name.into(),
            weight,
            ranks,
        }
    }

    /// Build from candidates in the source's native order (best first).
    ///
    /// Ranks are assigned densely from 1. A repeated id keeps its first rank.
    pub fn from_ordered<I, S>(name: impl Into<String>, weight: f64, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ranks = HashMap::new();
        let mut next_rank = 1u32;
        for id in ids {
            if let std::collections::hash_map::Entry::Vacant(slot) = ranks.entry(id.into()) {
                slot.insert(next_rank);
                next_rank += 1;
            }
        }
        Self::new(name, weight, ranks)
    }

    /// Build from already-ranked candidates
    pub fn from_candidates(name: impl Into<String>, weight: f64, candidates: &[CandidateRank]) -> Self {
        let ranks = candidates
            .iter()
            .map(|c| (c.id.clone(), c.rank))
            .collect();
        Self::new(name, weight, ranks)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn rank_of(&self, id: &str) -> Option<u32> {
        self.ranks.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// A candidate after fusion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub id: String,
    pub fused_score: f64,
    /// Rank in every fused source, `None` where the source did not return the id
    pub ranks: BTreeMap<String, Option<u32>>,
}

impl FusedResult {
    pub fn rank_in(&self, source: &str) -> Option<u32> {
        self.ranks.get(source).copied().flatten()
    }
}

/// Fuse two rankings
pub fn fuse_pair(a: &SourceRanking, b: &SourceRanking, k: u32) -> Result<Vec<FusedResult>> {
    fuse(&[a, b], k)
}

/// Fuse any number of rankings with RRF.
///
/// Output holds every id that appears in at least one source, ordered by fused
/// score descending; equal scores are ordered by id ascending.
pub fn fuse(sources: &[&SourceRanking], k: u32) -> Result<Vec<FusedResult>> {
    let mut seen_names = std::collections::HashSet::new();
    for source in sources {
        validate_weight(&format!("weight of '{}'", source.name), source.weight)?;
        if !seen_names.insert(source.name.as_str()) {
            return Err(SearchError::config(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
        if let Some((id, _)) = source.ranks.iter().find(|(_, rank)| **rank == 0) {
            return Err(SearchError::config(format!(
                "source '{}' ranked '{}' at 0; ranks start at 1",
                source.name, id
            )));
        }
    }

    let mut fused: HashMap<&str, FusedResult> = HashMap::new();
    for source in sources {
        for (id, &rank) in &source.ranks {
            let entry = fused.entry(id.as_str()).or_insert_with(|| FusedResult {
                id: id.clone(),
                fused_score: 0.0,
                ranks: sources.iter().map(|s| (s.name.clone(), None)).collect(),
            });
            entry.fused_score += source.weight / (k as f64 + rank as f64);
            entry.ranks.insert(source.name.clone(), Some(rank));
        }
    }

    let mut results: Vec<FusedResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ranks(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(id, r)| (id.to_string(), *r)).collect()
    }

    fn ids(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_two_source_scenario() {
        let vector = SourceRanking::new("vector", 0.5, ranks(&[("t1", 1), ("t2", 2)]));
        let keyword = SourceRanking::new("keyword", 0.5, ranks(&[("t2", 1), ("t3", 2)]));

        let results = fuse_pair(&vector, &keyword, 60).unwrap();

        assert_eq!(ids(&results), vec!["t2", "t1", "t3"]);
        assert!((results[0].fused_score - (0.5 / 61.0 + 0.5 / 61.0)).abs() < 1e-12);
        assert!((results[0].fused_score - 0.01639).abs() < 1e-5);
        assert!((results[1].fused_score - 0.00820).abs() < 1e-5);
        assert!((results[2].fused_score - 0.00806).abs() < 1e-5);

        assert_eq!(results[0].rank_in("vector"), Some(2));
        assert_eq!(results[0].rank_in("keyword"), Some(1));
        assert_eq!(results[1].rank_in("keyword"), None);
        assert_eq!(results[2].rank_in("vector"), None);
        assert_eq!(results[2].ranks.len(), 2);
    }

    #[test]
    fn test_output_is_union_of_inputs() {
        let a = SourceRanking::new("a", 1.0, ranks(&[("x", 1), ("y", 2), ("z", 3)]));
        let b = SourceRanking::new("b", 0.2, ranks(&[("z", 1), ("w", 2)]));

        let results = fuse_pair(&a, &b, 60).unwrap();
        assert_eq!(results.len(), 4);
        for id in ["x", "y", "z", "w"] {
            assert!(results.iter().any(|r| r.id == id));
        }
    }

    #[test]
    fn test_empty_sides() {
        let empty = SourceRanking::new("a", 0.5, HashMap::new());
        let full = SourceRanking::new("b", 0.5, ranks(&[("t1", 1), ("t2", 2)]));

        let results = fuse_pair(&empty, &full, 60).unwrap();
        assert_eq!(ids(&results), vec!["t1", "t2"]);
        assert!((results[0].fused_score - 0.5 / 61.0).abs() < 1e-12);

        let other_empty = SourceRanking::new("b", 0.5, HashMap::new());
        assert!(fuse_pair(&empty, &other_empty, 60).unwrap().is_empty());
    }

    #[test]
    fn test_symmetry_under_swap() {
        let a = SourceRanking::new("a", 0.7, ranks(&[("t1", 1), ("t2", 2), ("t4", 3)]));
        let b = SourceRanking::new("b", 0.3, ranks(&[("t2", 1), ("t3", 2), ("t1", 3)]));

        let ab = fuse_pair(&a, &b, 60).unwrap();
        let ba = fuse_pair(&b, &a, 60).unwrap();

        assert_eq!(ids(&ab), ids(&ba));
        for (x, y) in ab.iter().zip(ba.iter()) {
            assert_eq!(x.fused_score, y.fused_score);
            assert_eq!(x.ranks, y.ranks);
        }
    }

    #[test]
    fn test_presence_in_both_never_scores_lower() {
        let a = SourceRanking::new("a", 0.8, ranks(&[("t1", 5)]));
        let b = SourceRanking::new("b", 0.2, ranks(&[("t1", 40)]));
        let only_a = SourceRanking::new("b", 0.2, HashMap::new());

        let both = fuse_pair(&a, &b, 60).unwrap();
        let single = fuse_pair(&a, &only_a, 60).unwrap();
        assert!(both[0].fused_score >= single[0].fused_score);
    }

    #[test]
    fn test_upper_bound_reached_only_at_rank_one() {
        let (w1, w2, k) = (0.6, 0.9, 10u32);
        let a = SourceRanking::new("a", w1, ranks(&[("best", 1), ("other", 2)]));
        let b = SourceRanking::new("b", w2, ranks(&[("best", 1), ("other", 1)]));

        let bound = w1 / (k as f64 + 1.0) + w2 / (k as f64 + 1.0);
        let results = fuse_pair(&a, &b, k).unwrap();

        assert!((results[0].fused_score - bound).abs() < 1e-12);
        assert!(results[1].fused_score < bound);
    }

    #[test]
    fn test_ties_break_by_id() {
        let a = SourceRanking::new("a", 0.5, ranks(&[("zeta", 1)]));
        let b = SourceRanking::new("b", 0.5, ranks(&[("alpha", 1)]));

        let results = fuse_pair(&a, &b, 60).unwrap();
        assert_eq!(ids(&results), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_k_zero_is_allowed() {
        let a = SourceRanking::new("a", 1.0, ranks(&[("t1", 1), ("t2", 2)]));
        let b = SourceRanking::new("b", 1.0, HashMap::new());

        let results = fuse_pair(&a, &b, 0).unwrap();
        assert_eq!(results[0].fused_score, 1.0);
        assert_eq!(results[1].fused_score, 0.5);
    }

    #[test]
    fn test_three_sources() {
        let a = SourceRanking::new("a", 1.0, ranks(&[("t1", 1)]));
        let b = SourceRanking::new("b", 1.0, ranks(&[("t2", 1)]));
        let c = SourceRanking::new("c", 1.0, ranks(&[("t2", 2), ("t1", 3)]));

        let results = fuse(&[&a, &b, &c], 60).unwrap();
        assert_eq!(ids(&results), vec!["t2", "t1"]);
        assert_eq!(results[0].ranks.len(), 3);
        assert_eq!(results[0].rank_in("a"), None);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let negative = SourceRanking::new("a", -0.1, ranks(&[("t1", 1)]));
        let fine = SourceRanking::new("b", 0.5, ranks(&[("t1", 1)]));
        assert!(matches!(fuse_pair(&negative, &fine, 60), Err(SearchError::Config(_))));

        let zero_rank = SourceRanking::new("a", 0.5, ranks(&[("t1", 0)]));
        assert!(matches!(fuse_pair(&zero_rank, &fine, 60), Err(SearchError::Config(_))));

        let same_name = SourceRanking::new("b", 0.5, ranks(&[("t2", 1)]));
        assert!(matches!(fuse_pair(&same_name, &fine, 60), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_from_ordered_assigns_dense_ranks() {
        let ranking = SourceRanking::from_ordered("v", 0.5, ["a", "b", "a", "c"]);
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking.rank_of("a"), Some(1));
        assert_eq!(ranking.rank_of("b"), Some(2));
        assert_eq!(ranking.rank_of("c"), Some(3));
        assert_eq!(ranking.rank_of("d"), None);
    }
}
