//! Re-rank: expensive semantic scoring, cached by candidate-set fingerprint.
//!
//! Cached values map document id to re-rank score, so a hit only applies scores
//! to the documents they were computed for. A failing or slow reranker degrades
//! the stage to the incoming `final_score` order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Stage, StageContext, StageOutput};
use crate::cache::CacheWriter;
use crate::config::ReRankConfig;
use crate::error::{RerankerError, StageError};
use crate::fingerprint::rerank_cache_key;
use crate::reranker::Reranker;
use crate::types::{Document, StageType, sort_by_final_score};

pub struct ReRankStage {
    enabled: bool,
    top_k: usize,
    cache_ttl: Duration,
    timeout: Duration,
    reranker: Arc<dyn Reranker>,
    writer: CacheWriter,
}

impl ReRankStage {
    pub fn new(
        config: &ReRankConfig,
        enabled: bool,
        reranker: Arc<dyn Reranker>,
        writer: CacheWriter,
    ) -> Self {
        Self {
            enabled,
            top_k: config.top_k,
            cache_ttl: config.cache_ttl(),
            timeout: config.timeout(),
            reranker,
            writer,
        }
    }

    pub fn reranker(&self) -> &Arc<dyn Reranker> {
        &self.reranker
    }

    async fn cached_scores(&self, key: &str) -> Option<HashMap<String, f64>> {
        let payload = match self.writer.cache().get(key).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!(error = %e, "Re-rank cache lookup failed");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(scores) => Some(scores),
            Err(e) => {
                warn!(error = %e, "Discarding malformed re-rank cache entry");
                None
            }
        }
    }

    fn apply_cached(
        &self,
        documents: Vec<Document>,
        scores: &HashMap<String, f64>,
    ) -> Vec<Document> {
        let mut scored: Vec<Document> = documents
            .into_iter()
            .filter_map(|mut doc| {
                let score = *scores.get(&doc.id)?;
                doc.rerank_score = score;
                doc.final_score = score;
                Some(doc)
            })
            .collect();
        sort_by_final_score(&mut scored);
        scored.truncate(self.top_k);
        scored
    }

    fn degrade(&self, mut documents: Vec<Document>, reason: String) -> StageOutput {
        warn!(reason = %reason, "Reranker unavailable, keeping current order");
        sort_by_final_score(&mut documents);
        documents.truncate(self.top_k);
        StageOutput::degraded(documents, reason)
    }
}

#[async_trait]
impl Stage for ReRankStage {
    fn stage_type(&self) -> StageType {
        StageType::ReRank
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn execute(
        &self,
        query: &str,
        documents: Vec<Document>,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        if documents.is_empty() {
            return Ok(StageOutput::ok(documents));
        }

        let key = rerank_cache_key(query, &documents);
        if ctx.use_cache {
            if let Some(scores) = self.cached_scores(&key).await {
                debug!(key = &key[..12], "Re-rank cache hit");
                return Ok(StageOutput::ok(self.apply_cached(documents, &scores)));
            }
        }

        let candidates = documents.len().min(self.top_k.saturating_mul(2));
        let call = self.reranker.rerank(query, documents.clone(), candidates);
        let mut reranked = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reranked)) => reranked,
            Ok(Err(e)) => return Ok(self.degrade(documents, e.to_string())),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                let reason = RerankerError::Timeout { timeout_ms }.to_string();
                return Ok(self.degrade(documents, reason));
            }
        };

        for doc in &mut reranked {
            doc.final_score = doc.rerank_score;
        }
        sort_by_final_score(&mut reranked);

        if ctx.use_cache {
            let scores: HashMap<&str, f64> = reranked
                .iter()
                .map(|d| (d.id.as_str(), d.rerank_score))
                .collect();
            match serde_json::to_string(&scores) {
                Ok(payload) => {
                    let _ = self.writer.submit(key, payload, Some(self.cache_ttl));
                }
                Err(e) => warn!(error = %e, "Failed to serialize re-rank scores"),
            }
        }

        reranked.truncate(self.top_k);
        Ok(StageOutput::ok(reranked))
    }
}
