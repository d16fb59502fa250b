//! Error types for the Stagerank retrieval core.
//!
//! Uses `thiserror` for public API error types. Collaborator errors are recovered
//! inside the owning stage; only management operations surface them to callers.

use std::path::PathBuf;

/// Top-level error type for the Stagerank core library.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Reranker error: {0}")]
    Reranker(#[from] RerankerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the vector store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("Search failed: {message}")]
    Search { message: String },

    #[error("Indexing failed: {message}")]
    Indexing { message: String },

    #[error("Vector store unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors from the re-ranking collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RerankerError {
    #[error("Rerank request failed: {message}")]
    Request { message: String },

    #[error("Rerank timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Reranker unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors from a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {message}")]
    Backend { message: String },

    #[error("Cache lock poisoned")]
    Poisoned,

    #[error("Cache is closed")]
    Closed,
}

/// Errors raised by a single scoring rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: String, reason: String },
}

/// Errors from a stage's own logic.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Recall failed: {0}")]
    Recall(#[from] VectorStoreError),

    #[error("Scoring task failed: {message}")]
    ScoringTask { message: String },

    #[error("Stage '{stage}' failed: {message}")]
    Other { stage: String, message: String },
}

/// Errors that abort a pipeline run as a whole.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline exceeded request deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("All {attempted} executed stages failed")]
    AllStagesFailed { attempted: usize },

    #[error("Recall produced no candidates: {message}")]
    RecallFailed { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Invalid pattern for keyword '{keyword}': {message}")]
    Pattern { keyword: String, message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// A type alias for results using the top-level `RetrievalError`.
pub type Result<T> = std::result::Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_vector_store() {
        let err = RetrievalError::VectorStore(VectorStoreError::Search {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Vector store error: Search failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_reranker_timeout() {
        let err = RerankerError::Timeout { timeout_ms: 3000 };
        assert_eq!(err.to_string(), "Rerank timed out after 3000ms");
    }

    #[test]
    fn test_error_display_pipeline() {
        let err = RetrievalError::Pipeline(PipelineError::DeadlineExceeded { timeout_ms: 2000 });
        assert_eq!(
            err.to_string(),
            "Pipeline error: Pipeline exceeded request deadline of 2000ms"
        );
    }

    #[test]
    fn test_stage_error_from_vector_store() {
        let err: StageError = VectorStoreError::Unavailable {
            message: "down".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Recall failed: Vector store unavailable: down"
        );
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::invalid("pre_rank.top_k must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: pre_rank.top_k must be > 0"
        );
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: RetrievalError = serde_err.into();
        assert!(matches!(err, RetrievalError::Serialization(_)));
    }
}
