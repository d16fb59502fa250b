//! Authority rule: scores by the trustworthiness of the document's `source`.
//!
//! Score bounded to [0, 2]. Unknown sources get the lowest weight in the table.
//! `is_verified = true` multiplies by 1.2; `citation_count` above 10 / 100
//! multiplies by 1.1 / 1.3.

use serde_json::Value;
use std::collections::BTreeMap;

use super::Rule;
use crate::config::AuthorityRuleConfig;
use crate::error::RuleError;
use crate::types::Document;

const MAX_SCORE: f64 = 2.0;

fn builtin_source_weights() -> BTreeMap<String, f64> {
    [
        ("wikipedia", 1.0),
        ("textbook", 0.9),
        ("research_paper", 0.8),
        ("news", 0.6),
        ("blog", 0.3),
        ("forum", 0.2),
        ("unknown", 0.1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone)]
pub struct AuthorityRule {
    weight: f64,
    source_weights: BTreeMap<String, f64>,
    fallback_weight: f64,
}

impl AuthorityRule {
    pub fn new(config: &AuthorityRuleConfig) -> Self {
        let mut source_weights = builtin_source_weights();
        source_weights.extend(config.source_weights.clone());
        let fallback_weight = source_weights
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .max(0.0);
        Self {
            weight: config.weight,
            source_weights,
            fallback_weight,
        }
    }

    fn source_weight(&self, document: &Document) -> f64 {
        document
            .metadata
            .get("source")
            .and_then(Value::as_str)
            .and_then(|s| self.source_weights.get(s))
            .copied()
            .unwrap_or(self.fallback_weight)
    }
}

impl Rule for AuthorityRule {
    fn name(&self) -> &str {
        "authority"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, document: &Document, _query: Option<&str>) -> Result<f64, RuleError> {
        let mut score = self.source_weight(document);

        let verified = document.metadata.get("is_verified");
        if verified.and_then(Value::as_bool) == Some(true) {
            score *= 1.2;
        }

        if let Some(value) = document.metadata.get("citation_count") {
            let citations = value.as_f64().ok_or_else(|| RuleError::InvalidMetadata {
                field: "citation_count".into(),
                reason: format!("expected a number, got {value}"),
            })?;
            if citations > 100.0 {
                score *= 1.3;
            } else if citations > 10.0 {
                score *= 1.1;
            }
        }

        Ok(score.clamp(0.0, MAX_SCORE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> AuthorityRule {
        AuthorityRule::new(&AuthorityRuleConfig::default())
    }

    #[test]
    fn test_known_sources() {
        let r = rule();
        let wiki = Document::new("a", "").with_metadata("source", "wikipedia");
        let blog = Document::new("b", "").with_metadata("source", "blog");
        assert_eq!(r.score(&wiki, None).unwrap(), 1.0);
        assert_eq!(r.score(&blog, None).unwrap(), 0.3);
    }

    #[test]
    fn test_unknown_source_gets_lowest_weight() {
        let r = rule();
        let doc = Document::new("a", "").with_metadata("source", "pamphlet");
        assert_eq!(r.score(&doc, None).unwrap(), 0.1);
        assert_eq!(r.score(&Document::new("b", ""), None).unwrap(), 0.1);
    }

    #[test]
    fn test_config_overrides_table() {
        let mut source_weights = BTreeMap::new();
        source_weights.insert("blog".to_string(), 0.95);
        source_weights.insert("rumor".to_string(), 0.05);
        let r = AuthorityRule::new(&AuthorityRuleConfig {
            weight: 1.0,
            source_weights,
        });
        let blog = Document::new("a", "").with_metadata("source", "blog");
        assert_eq!(r.score(&blog, None).unwrap(), 0.95);
        // "rumor" is now the lowest weight, so unknown sources fall to it.
        let unknown = Document::new("b", "").with_metadata("source", "pamphlet");
        assert_eq!(r.score(&unknown, None).unwrap(), 0.05);
    }

    #[test]
    fn test_boosts_and_cap() {
        let r = rule();
        let doc = Document::new("a", "")
            .with_metadata("source", "wikipedia")
            .with_metadata("is_verified", true)
            .with_metadata("citation_count", 500);
        assert!((r.score(&doc, None).unwrap() - 1.56).abs() < 1e-9);

        let doc = Document::new("b", "")
            .with_metadata("source", "news")
            .with_metadata("citation_count", 50);
        assert!((r.score(&doc, None).unwrap() - 0.66).abs() < 1e-9);

        let mut weights = BTreeMap::new();
        weights.insert("oracle".to_string(), 1.9);
        let r = AuthorityRule::new(&AuthorityRuleConfig {
            weight: 1.0,
            source_weights: weights,
        });
        let doc = Document::new("c", "")
            .with_metadata("source", "oracle")
            .with_metadata("is_verified", true);
        assert_eq!(r.score(&doc, None).unwrap(), 2.0);
    }

    #[test]
    fn test_non_numeric_citations_is_error() {
        let doc = Document::new("a", "").with_metadata("citation_count", "many");
        assert!(rule().score(&doc, None).is_err());
    }
}
