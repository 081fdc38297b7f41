pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod fts;
pub mod fusion;
pub mod index;
pub mod output;
pub mod rerank;
pub mod search;
pub mod server;
pub mod vectordb;

// Re-export commonly used types
pub use config::Config;
pub use engine::{HybridMode, HybridOptions, HybridResult, ScoredTable, SearchEngine};
pub use error::{Result, SearchError};
pub use fusion::{fuse, CandidateRank, FusedResult, SourceRanking};
pub use rerank::{RerankCandidate, RerankOutcome, RerankedResult, Reranker};
pub use search::{DistanceMetric, RetrievalCoordinator};
pub use vectordb::{StoreStats, TableRecord, TableStore};
