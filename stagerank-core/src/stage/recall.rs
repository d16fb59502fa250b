//! Recall: broad candidate retrieval from the vector store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Stage, StageContext, StageOutput};
use crate::config::RecallConfig;
use crate::error::StageError;
use crate::types::{Document, StageType};
use crate::vector_store::VectorStore;

pub struct RecallStage {
    enabled: bool,
    top_k: usize,
    score_threshold: f64,
    vector_store: Arc<dyn VectorStore>,
}

impl RecallStage {
    pub fn new(config: &RecallConfig, enabled: bool, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            enabled,
            top_k: config.top_k,
            score_threshold: config.score_threshold,
            vector_store,
        }
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }
}

#[async_trait]
impl Stage for RecallStage {
    fn stage_type(&self) -> StageType {
        StageType::Recall
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Seed documents pass through untouched; otherwise search the store.
    async fn execute(
        &self,
        query: &str,
        documents: Vec<Document>,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        if !documents.is_empty() {
            debug!(count = documents.len(), "Recall using seed documents");
            return Ok(StageOutput::ok(documents));
        }

        let mut hits = self
            .vector_store
            .search(query, self.top_k, ctx.filters.as_ref())
            .await?;

        if self.score_threshold > 0.0 {
            let before = hits.len();
            hits.retain(|d| d.vector_score >= self.score_threshold);
            debug!(
                dropped = before - hits.len(),
                threshold = self.score_threshold,
                "Recall applied score threshold"
            );
        }
        Ok(StageOutput::ok(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;

    async fn store() -> Arc<dyn VectorStore> {
        let store = InMemoryVectorStore::default();
        store
            .add_documents(vec![
                Document::new("a", "rust ownership and borrowing"),
                Document::new("b", "garden tomatoes in summer"),
            ])
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_seed_documents_pass_through() {
        let stage = RecallStage::new(&RecallConfig::default(), true, store().await);
        let seed = vec![Document::new("seed", "x")];
        let out = stage
            .execute("rust", seed, &StageContext::default())
            .await
            .unwrap();
        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.documents[0].id, "seed");
    }

    #[tokio::test]
    async fn test_searches_store() {
        let stage = RecallStage::new(&RecallConfig::default(), true, store().await);
        let out = stage
            .execute("rust borrowing", Vec::new(), &StageContext::default())
            .await
            .unwrap();
        assert_eq!(out.documents[0].id, "a");
        assert!(out.degraded.is_none());
    }

    #[tokio::test]
    async fn test_score_threshold_filters() {
        let config = RecallConfig {
            top_k: 10,
            score_threshold: 0.2,
        };
        let stage = RecallStage::new(&config, true, store().await);
        let out = stage
            .execute("rust borrowing", Vec::new(), &StageContext::default())
            .await
            .unwrap();
        assert_eq!(out.documents[0].id, "a");
        assert!(out.documents.iter().all(|d| d.vector_score >= 0.2));

        let strict = RecallConfig {
            top_k: 10,
            score_threshold: 0.99,
        };
        let stage = RecallStage::new(&strict, true, store().await);
        let out = stage
            .execute("rust borrowing", Vec::new(), &StageContext::default())
            .await
            .unwrap();
        assert!(out.documents.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_error() {
        let store = InMemoryVectorStore::default();
        store.close().await.unwrap();
        let stage = RecallStage::new(&RecallConfig::default(), true, Arc::new(store));
        let err = stage
            .execute("q", Vec::new(), &StageContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Recall(_)));
    }
}
