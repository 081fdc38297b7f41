use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SearchError;

/// Distance metric used by vector retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    #[serde(rename = "cosine")]
    Cosine,
    /// Euclidean distance
    #[serde(rename = "L2")]
    L2,
    /// Negative inner product
    #[serde(rename = "dot_product")]
    DotProduct,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [Self::Cosine, Self::L2, Self::DotProduct];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "L2",
            Self::DotProduct => "dot_product",
        }
    }

    /// Convert a raw distance into a similarity score (higher is better).
    ///
    /// Callers compare scores across metrics, so these formulas are fixed:
    /// cosine `1 - d`, L2 `1 / (1 + d)`, dot product `-d`.
    pub fn normalize(&self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::L2 => 1.0 / (1.0 + distance),
            Self::DotProduct => -distance,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "L2" | "l2" => Ok(Self::L2),
            "dot_product" => Ok(Self::DotProduct),
            other => Err(SearchError::config(format!(
                "unknown distance metric '{}' (expected cosine, L2 or dot_product)",
                other
            ))),
        }
    }
}

/// Round a score to 4 decimal places for presentation
pub fn round_score(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_contract() {
        assert!((DistanceMetric::Cosine.normalize(0.2) - 0.8).abs() < 1e-6);
        assert!((DistanceMetric::L2.normalize(1.0) - 0.5).abs() < 1e-6);
        assert!((DistanceMetric::DotProduct.normalize(-0.9) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert_eq!(
            "dot_product".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::DotProduct
        );
        assert!(matches!(
            "manhattan".parse::<DistanceMetric>(),
            Err(SearchError::Config(_))
        ));
    }

    #[test]
    fn test_serde_tokens() {
        assert_eq!(serde_json::to_string(&DistanceMetric::L2).unwrap(), "\"L2\"");
        let metric: DistanceMetric = serde_json::from_str("\"dot_product\"").unwrap();
        assert_eq!(metric, DistanceMetric::DotProduct);
        for metric in DistanceMetric::ALL {
            assert_eq!(metric.as_str().parse::<DistanceMetric>().unwrap(), metric);
        }
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.123456), 0.1235);
        assert_eq!(round_score(0.8), 0.8);
    }
}
