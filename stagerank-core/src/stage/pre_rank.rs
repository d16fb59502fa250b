//! Pre-rank: cheap lexical and rule-based re-scoring of recall candidates.
//!
//! `final = bm25_weight * bm25 + rule_weight * rule`. Scoring is CPU-bound and
//! runs on the blocking thread pool.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Stage, StageContext, StageOutput};
use crate::bm25::Bm25Ranker;
use crate::config::PreRankConfig;
use crate::error::StageError;
use crate::rules::RuleEngine;
use crate::types::{Document, StageType, sort_by_final_score};

#[derive(Debug, Clone)]
pub struct PreRankStage {
    enabled: bool,
    top_k: usize,
    bm25_weight: f64,
    rule_weight: f64,
    ranker: Bm25Ranker,
    rules: Arc<RuleEngine>,
}

impl PreRankStage {
    pub fn new(config: &PreRankConfig, enabled: bool, rules: Arc<RuleEngine>) -> Self {
        Self {
            enabled,
            top_k: config.top_k,
            bm25_weight: config.bm25_weight,
            rule_weight: config.rule_weight,
            ranker: Bm25Ranker::new(config.bm25_k1, config.bm25_b),
            rules,
        }
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    /// Score, sort and truncate synchronously.
    pub fn score(&self, query: &str, mut documents: Vec<Document>) -> Vec<Document> {
        let bm25 = self.ranker.score_batch(query, &documents);
        for (doc, bm25_score) in documents.iter_mut().zip(bm25) {
            doc.bm25_score = bm25_score;
            doc.rule_score = self.rules.score(doc, Some(query));
            doc.final_score = self.bm25_weight * doc.bm25_score + self.rule_weight * doc.rule_score;
        }
        sort_by_final_score(&mut documents);
        documents.truncate(self.top_k);
        documents
    }
}

#[async_trait]
impl Stage for PreRankStage {
    fn stage_type(&self) -> StageType {
        StageType::PreRank
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn execute(
        &self,
        query: &str,
        documents: Vec<Document>,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        if documents.is_empty() {
            return Ok(StageOutput::ok(documents));
        }

        let this = self.clone();
        let query = query.to_string();
        let ranked = tokio::task::spawn_blocking(move || this.score(&query, documents))
            .await
            .map_err(|e| StageError::ScoringTask {
                message: e.to_string(),
            })?;
        Ok(StageOutput::ok(ranked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeywordRuleConfig, RuleEngineConfig, RuleKind};

    fn keyword_engine(mandatory: &[&str]) -> Arc<RuleEngine> {
        let config = RuleEngineConfig {
            enabled_rules: vec![RuleKind::Keyword],
            keyword: KeywordRuleConfig {
                mandatory_keywords: mandatory.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        Arc::new(RuleEngine::from_config(&config).unwrap())
    }

    #[tokio::test]
    async fn test_empty_input() {
        let rules = Arc::new(RuleEngine::default());
        let stage = PreRankStage::new(&PreRankConfig::default(), true, rules);
        let out = stage
            .execute("q", Vec::new(), &StageContext::default())
            .await
            .unwrap();
        assert!(out.documents.is_empty());
    }

    #[tokio::test]
    async fn test_combines_bm25_and_rules() {
        let stage = PreRankStage::new(&PreRankConfig::default(), true, keyword_engine(&[]));
        let docs = vec![
            Document::new("miss", "gardening tips for spring"),
            Document::new("hit", "rust async runtime internals"),
        ];
        let out = stage
            .execute("rust async", docs, &StageContext::default())
            .await
            .unwrap();
        let top = &out.documents[0];
        assert_eq!(top.id, "hit");
        assert!(top.bm25_score > 0.0);
        assert!((top.rule_score - 0.2).abs() < 1e-9);
        let expected = 0.7 * top.bm25_score + 0.3 * top.rule_score;
        assert!((top.final_score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mandatory_keyword_ranks_last() {
        let stage = PreRankStage::new(&PreRankConfig::default(), true, keyword_engine(&["tokio"]));
        let docs = vec![
            Document::new("a", "async rust with tokio"),
            Document::new("b", "async rust with smol"),
            Document::new("c", "async rust with async-std"),
        ];
        let out = stage
            .execute("async rust", docs, &StageContext::default())
            .await
            .unwrap();
        assert_eq!(out.documents[0].id, "a");
        assert!(out.documents[1..].iter().all(|d| d.rule_score == -1.0));
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let config = PreRankConfig {
            top_k: 2,
            ..Default::default()
        };
        let stage = PreRankStage::new(&config, true, Arc::new(RuleEngine::default()));
        let docs = (0..5).map(|i| Document::new(format!("d{i}"), "text")).collect();
        let out = stage
            .execute("text", docs, &StageContext::default())
            .await
            .unwrap();
        assert_eq!(out.documents.len(), 2);
    }
}
