//! # Stagerank Core
//!
//! Multi-stage document retrieval: a broad vector recall, a cheap BM25 and
//! rule-based pre-rank, and an expensive semantic re-rank, composed into a
//! pipeline with per-stage degradation, a circuit breaker, and result and
//! re-rank caching.

pub mod bm25;
pub mod cache;
pub mod circuit;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod rules;
pub mod stage;
pub mod types;
pub mod vector_store;

// Re-export commonly used types at the crate root.
pub use bm25::{Bm25Ranker, Tokenizer, WhitespaceTokenizer};
pub use cache::{Cache, CacheStats, CacheWriter, MemoryCache, NullCache, create_cache};
pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{RetrieverConfig, load_config};
pub use error::{
    CacheError, ConfigError, PipelineError, RerankerError, Result, RetrievalError, RuleError,
    StageError, VectorStoreError,
};
pub use metrics::{MetricsSnapshot, RetrievalMetrics};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use reranker::{PassthroughReranker, Reranker};
pub use retriever::{Retriever, RetrieverStats};
pub use rules::{Rule, RuleEngine, RuleInfo, describe_rule};
pub use stage::{Stage, StageContext, StageOutput};
pub use types::{
    Document, Filters, ResultMetrics, RetrievalRequest, RetrievalResult, StageMetrics, StageToggles,
    StageType,
};
pub use vector_store::{HashingEmbedder, InMemoryVectorStore, VectorStore};
