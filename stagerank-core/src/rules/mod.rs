//! Rule-based document scoring.
//!
//! A [`RuleEngine`] combines independently configured [`Rule`]s into one
//! weighted-mean score. Rules that fail on a document are logged and left out of
//! that document's aggregate instead of failing the request.

pub mod authority;
pub mod keyword;
pub mod length;
pub mod recency;

pub use authority::AuthorityRule;
pub use keyword::KeywordRule;
pub use length::LengthRule;
pub use recency::RecencyRule;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RuleEngineConfig, RuleKind};
use crate::error::{ConfigError, RuleError};
use crate::types::Document;

/// A pluggable scoring rule.
///
/// Each implementation documents the bounds of the score it returns.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn weight(&self) -> f64;

    fn score(&self, document: &Document, query: Option<&str>) -> Result<f64, RuleError>;
}

/// Human-readable one-line description of a rule.
pub fn describe_rule(rule: &dyn Rule) -> String {
    format!("{} (weight: {})", rule.name(), rule.weight())
}

/// Construct the built-in rule for `kind` from the engine configuration.
pub fn build_rule(kind: RuleKind, config: &RuleEngineConfig) -> Result<Box<dyn Rule>, ConfigError> {
    let rule: Box<dyn Rule> = match kind {
        RuleKind::Recency => Box::new(RecencyRule::new(&config.recency)),
        RuleKind::Authority => Box::new(AuthorityRule::new(&config.authority)),
        RuleKind::Keyword => Box::new(KeywordRule::new(&config.keyword)?),
        RuleKind::Length => Box::new(LengthRule::new(&config.length)),
    };
    Ok(rule)
}

/// Summary of a loaded rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub name: String,
    pub weight: f64,
    pub description: String,
}

/// Weighted combination of scoring rules.
#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Build every rule listed in `enabled_rules`. Duplicates are loaded once.
    pub fn from_config(config: &RuleEngineConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.enabled_rules.len());
        let mut seen = Vec::new();
        for &kind in &config.enabled_rules {
            if seen.contains(&kind) {
                continue;
            }
            seen.push(kind);
            rules.push(build_rule(kind, config)?);
            debug!(rule = kind.as_str(), "Loaded rule");
        }
        info!(count = rules.len(), "Rule engine initialized");
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `sum(score * weight) / sum(weight)` over the rules that succeeded.
    ///
    /// Returns 0 when no rules are loaded, all failed, or the surviving weights sum to 0.
    pub fn score(&self, document: &Document, query: Option<&str>) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for rule in &self.rules {
            match rule.score(document, query) {
                Ok(score) => {
                    weighted += score * rule.weight();
                    total_weight += rule.weight();
                }
                Err(e) => {
                    warn!(
                        rule = rule.name(),
                        doc_id = %document.id,
                        error = %e,
                        "Rule failed, excluded from score"
                    );
                }
            }
        }

        if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        }
    }

    pub fn rule_info(&self) -> Vec<RuleInfo> {
        self.rules
            .iter()
            .map(|rule| RuleInfo {
                name: rule.name().to_string(),
                weight: rule.weight(),
                description: describe_rule(rule.as_ref()),
            })
            .collect()
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("RuleEngine").field("rules", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRule {
        name: &'static str,
        weight: f64,
        score: f64,
    }

    fn fixed(name: &'static str, weight: f64, score: f64) -> FixedRule {
        FixedRule {
            name,
            weight,
            score,
        }
    }

    impl Rule for FixedRule {
        fn name(&self) -> &str {
            self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        fn score(&self, _document: &Document, _query: Option<&str>) -> Result<f64, RuleError> {
            Ok(self.score)
        }
    }

    struct BrokenRule;

    impl Rule for BrokenRule {
        fn name(&self) -> &str {
            "broken"
        }
        fn weight(&self) -> f64 {
            10.0
        }
        fn score(&self, _document: &Document, _query: Option<&str>) -> Result<f64, RuleError> {
            Err(RuleError::InvalidMetadata {
                field: "x".into(),
                reason: "always".into(),
            })
        }
    }

    #[test]
    fn test_empty_engine_scores_zero() {
        let engine = RuleEngine::default();
        assert!(engine.is_empty());
        assert_eq!(engine.score(&Document::new("a", "text"), Some("q")), 0.0);
    }

    #[test]
    fn test_weighted_mean() {
        let engine = RuleEngine::new(vec![
            Box::new(fixed("a", 1.0, 1.0)),
            Box::new(fixed("b", 3.0, 0.0)),
        ]);
        let score = engine.score(&Document::new("d", ""), None);
        assert!((score - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_failing_rule_is_excluded() {
        let engine = RuleEngine::new(vec![Box::new(fixed("a", 1.0, 0.8)), Box::new(BrokenRule)]);
        let score = engine.score(&Document::new("d", ""), None);
        assert!((score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_all_rules_failing_scores_zero() {
        let engine = RuleEngine::new(vec![Box::new(BrokenRule)]);
        assert_eq!(engine.score(&Document::new("d", ""), None), 0.0);
    }

    #[test]
    fn test_describe_rule() {
        let rule = fixed("fixed", 0.5, 0.0);
        assert_eq!(describe_rule(&rule), "fixed (weight: 0.5)");
    }

    #[test]
    fn test_from_config_loads_enabled_rules_once() {
        let mut config = RuleEngineConfig::default();
        config.enabled_rules = vec![RuleKind::Keyword, RuleKind::Length, RuleKind::Keyword];
        let engine = RuleEngine::from_config(&config).unwrap();
        assert_eq!(engine.len(), 2);

        let info = engine.rule_info();
        assert_eq!(info[0].name, "keyword");
        assert_eq!(info[0].weight, 0.5);
        assert_eq!(info[1].name, "length");
        assert_eq!(info[1].description, "length (weight: 0.1)");
    }

    #[test]
    fn test_from_config_default_rules() {
        let engine = RuleEngine::from_config(&RuleEngineConfig::default()).unwrap();
        let names: Vec<_> = engine.rule_info().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["recency", "authority", "keyword"]);
    }
}
