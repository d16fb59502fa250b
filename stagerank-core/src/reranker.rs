//! Re-ranking collaborator used by the re-rank stage.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RerankerError;
use crate::types::{Document, sort_by_final_score};

/// Scores candidates against a query, typically with a cross-encoder model.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return at most `top_k` documents with `rerank_score` set, best first.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<Document>,
        top_k: usize,
    ) -> Result<Vec<Document>, RerankerError>;

    fn model_info(&self) -> HashMap<String, Value>;

    async fn close(&self) -> Result<(), RerankerError> {
        Ok(())
    }
}

/// Keeps the incoming order: each document's `rerank_score` is its current
/// `final_score`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut documents: Vec<Document>,
        top_k: usize,
    ) -> Result<Vec<Document>, RerankerError> {
        for doc in &mut documents {
            doc.rerank_score = doc.final_score;
        }
        sort_by_final_score(&mut documents);
        documents.truncate(top_k);
        Ok(documents)
    }

    fn model_info(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), Value::from("passthrough")),
            ("type".to_string(), Value::from("score_passthrough")),
        ])
    }
}
