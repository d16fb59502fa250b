//! Core data types shared across the retrieval pipeline.
//!
//! A [`Document`] carries one score field per stage plus the aggregate `final_score`.
//! Stages write only their own field and may overwrite `final_score`, so after a
//! request the aggregate always reflects the most recent stage that ran.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Metadata filters passed through to the vector store.
///
/// A `BTreeMap` keeps key order stable, which the result fingerprint relies on.
pub type Filters = BTreeMap<String, serde_json::Value>;

/// A retrievable document and its per-stage scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub vector_score: f64,
    #[serde(default)]
    pub bm25_score: f64,
    #[serde(default)]
    pub rule_score: f64,
    #[serde(default)]
    pub rerank_score: f64,
    #[serde(default)]
    pub final_score: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            vector_score: 0.0,
            bm25_score: 0.0,
            rule_score: 0.0,
            rerank_score: 0.0,
            final_score: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the vector similarity score (and the aggregate, as recall would).
    pub fn with_vector_score(mut self, score: f64) -> Self {
        self.vector_score = score;
        self.final_score = score;
        self
    }
}

/// Sort documents by `final_score`, highest first. Ties keep their input order.
pub fn sort_by_final_score(documents: &mut [Document]) {
    documents.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// The pipeline stage a result terminated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Recall,
    PreRank,
    ReRank,
    /// A stage failed, or the request went down the recall-only path.
    Fallback,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Recall => "recall",
            StageType::PreRank => "pre_rank",
            StageType::ReRank => "re_rank",
            StageType::Fallback => "fallback",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and cardinality record for a single stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage_name: String,
    pub latency_ms: f64,
    pub input_count: usize,
    pub output_count: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StageMetrics {
    /// Zero-cost record for a stage that was skipped.
    pub fn disabled(stage: StageType, count: usize) -> Self {
        Self::succeeded(stage, 0.0, count, count)
    }

    pub fn succeeded(stage: StageType, latency_ms: f64, input: usize, output: usize) -> Self {
        Self {
            stage_name: stage.as_str().to_string(),
            latency_ms,
            input_count: input,
            output_count: output,
            success: true,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        stage: StageType,
        latency_ms: f64,
        input: usize,
        output: usize,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stage_name: stage.as_str().to_string(),
            latency_ms,
            input_count: input,
            output_count: output,
            success: false,
            error_message: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Per-request stage enable overrides. `None` keeps the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageToggles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_rank: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub re_rank: Option<bool>,
}

impl StageToggles {
    pub fn get(&self, stage: StageType) -> Option<bool> {
        match stage {
            StageType::Recall => self.recall,
            StageType::PreRank => self.pre_rank,
            StageType::ReRank => self.re_rank,
            StageType::Fallback => None,
        }
    }

    pub fn set(&mut self, stage: StageType, enabled: bool) {
        match stage {
            StageType::Recall => self.recall = Some(enabled),
            StageType::PreRank => self.pre_rank = Some(enabled),
            StageType::ReRank => self.re_rank = Some(enabled),
            StageType::Fallback => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recall.is_none() && self.pre_rank.is_none() && self.re_rank.is_none()
    }
}

/// Input to [`Retriever::retrieve`](crate::retriever::Retriever::retrieve).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: Option<Filters>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub enable_stages: Option<StageToggles>,
}

fn default_true() -> bool {
    true
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            filters: None,
            use_cache: true,
            enable_stages: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.filters
            .get_or_insert_with(Filters::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_stage(mut self, stage: StageType, enabled: bool) -> Self {
        self.enable_stages
            .get_or_insert_with(StageToggles::default)
            .set(stage, enabled);
        self
    }
}

/// Diagnostics attached to a [`RetrievalResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    /// One record per stage the pipeline visited.
    #[serde(default)]
    pub stages: Vec<StageMetrics>,
    /// Why the fallback path was taken, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Error text from a failed fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final envelope returned for every retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub documents: Vec<Document>,
    pub stage: StageType,
    pub latency_ms: f64,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub fallback_triggered: bool,
    #[serde(default)]
    pub metrics: ResultMetrics,
}
