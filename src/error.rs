//! Error taxonomy for the retrieval and reranking core.
//!
//! Retrieval-path failures (embedding, retrieval sources, metadata) are fatal to
//! a query. LLM failures are recovered inside the reranker and only surface
//! here so they can be logged.

use std::time::Duration;
use thiserror::Error;

/// Result type for core search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Embedding service unreachable or returned malformed output.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A retrieval source or the metadata store failed.
    #[error("retrieval source '{source_name}' failed: {message}")]
    Retrieval { source_name: String, message: String },

    /// Transport failure talking to the LLM scorer.
    #[error("LLM call failed: {0}")]
    LlmCall(String),

    /// The LLM answered, but not with a usable score array.
    #[error("malformed LLM response: {0}")]
    Parse(String),

    /// Invalid weights, rrf k, batch size or other settings.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SearchError {
    pub fn retrieval(source_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Retrieval {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True when the failure happened before any ranking was produced.
    pub fn is_retrieval_failure(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Retrieval { .. })
    }
}

pub(crate) fn timed_out(what: &str, after: Duration) -> String {
    format!("{} timed out after {:?}", what, after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_message_names_source() {
        let err = SearchError::retrieval("bm25", "index missing");
        assert_eq!(
            err.to_string(),
            "retrieval source 'bm25' failed: index missing"
        );
        assert!(err.is_retrieval_failure());
    }

    #[test]
    fn test_llm_errors_are_not_retrieval_failures() {
        assert!(!SearchError::LlmCall("connection refused".into()).is_retrieval_failure());
        assert!(!SearchError::Parse("no array".into()).is_retrieval_failure());
    }

    #[test]
    fn test_timed_out_message() {
        let msg = timed_out("vector query", Duration::from_secs(2));
        assert_eq!(msg, "vector query timed out after 2s");
    }
}
