//! Keyword rule: rewards configured keywords and query terms found in the content.
//!
//! Score bounded to [-1, 3]. A document missing any mandatory keyword scores
//! -1 outright. Matching is case-insensitive on word boundaries.

use std::collections::HashSet;

use regex::Regex;

use super::Rule;
use crate::config::KeywordRuleConfig;
use crate::error::{ConfigError, RuleError};
use crate::types::Document;

const BOOST_PER_MATCH: f64 = 0.3;
const MAX_BOOST: f64 = 2.0;
const PENALTY_PER_MATCH: f64 = 0.2;
const MAX_PENALTY: f64 = 1.0;
const QUERY_TERM_BONUS: f64 = 0.1;
const MIN_QUERY_TERM_LEN: usize = 3;

fn keyword_pattern(keyword: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))).map_err(|e| ConfigError::Pattern {
        keyword: keyword.to_string(),
        message: e.to_string(),
    })
}

fn compile_all(keywords: &[String]) -> Result<Vec<Regex>, ConfigError> {
    keywords.iter().map(|k| keyword_pattern(k)).collect()
}

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().map(|p| p.find_iter(text).count()).sum()
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    weight: f64,
    mandatory: Vec<Regex>,
    boost: Vec<Regex>,
    penalty: Vec<Regex>,
    weighted: Vec<(Regex, f64)>,
    word: Regex,
}

impl KeywordRule {
    /// Compiles every configured keyword up front.
    pub fn new(config: &KeywordRuleConfig) -> Result<Self, ConfigError> {
        let weighted = config
            .keyword_weights
            .iter()
            .map(|(k, w)| keyword_pattern(k).map(|p| (p, *w)))
            .collect::<Result<Vec<_>, _>>()?;
        let word = Regex::new(r"\w+").map_err(|e| ConfigError::Pattern {
            keyword: r"\w+".into(),
            message: e.to_string(),
        })?;

        Ok(Self {
            weight: config.weight,
            mandatory: compile_all(&config.mandatory_keywords)?,
            boost: compile_all(&config.boost_keywords)?,
            penalty: compile_all(&config.penalty_keywords)?,
            weighted,
            word,
        })
    }

    fn query_term_bonus(&self, content: &str, query: &str) -> f64 {
        let content_words: HashSet<String> = self
            .word
            .find_iter(content)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let query_lower = query.to_lowercase();
        self.word
            .find_iter(&query_lower)
            .map(|m| m.as_str())
            .filter(|term| term.chars().count() >= MIN_QUERY_TERM_LEN)
            .filter(|term| content_words.contains(*term))
            .count() as f64
            * QUERY_TERM_BONUS
    }
}

impl Rule for KeywordRule {
    fn name(&self) -> &str {
        "keyword"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, document: &Document, query: Option<&str>) -> Result<f64, RuleError> {
        let content = document.content.as_str();

        if !self.mandatory.iter().all(|p| p.is_match(content)) {
            return Ok(-1.0);
        }

        let mut score = 0.0;

        let boosts = count_matches(&self.boost, content);
        score += (boosts as f64 * BOOST_PER_MATCH).min(MAX_BOOST);

        let penalties = count_matches(&self.penalty, content);
        score -= (penalties as f64 * PENALTY_PER_MATCH).min(MAX_PENALTY);

        score += self
            .weighted
            .iter()
            .filter(|(p, _)| p.is_match(content))
            .map(|(_, w)| w)
            .sum::<f64>();

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            score += self.query_term_bonus(content, query);
        }

        Ok(score.clamp(-1.0, 3.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rule(config: KeywordRuleConfig) -> KeywordRule {
        KeywordRule::new(&config).unwrap()
    }

    #[test]
    fn test_no_keywords_no_query_scores_zero() {
        let r = rule(KeywordRuleConfig::default());
        let doc = Document::new("d", "anything at all");
        assert_eq!(r.score(&doc, None).unwrap(), 0.0);
    }

    #[test]
    fn test_missing_mandatory_keyword() {
        let r = rule(KeywordRuleConfig {
            mandatory_keywords: strings(&["rust", "async"]),
            ..Default::default()
        });
        let partial = Document::new("a", "Rust is great");
        assert_eq!(r.score(&partial, None).unwrap(), -1.0);
        let full = Document::new("b", "RUST with Async runtimes");
        assert_eq!(r.score(&full, None).unwrap(), 0.0);
    }

    #[test]
    fn test_word_boundaries() {
        let r = rule(KeywordRuleConfig {
            boost_keywords: strings(&["rust"]),
            ..Default::default()
        });
        let doc = Document::new("a", "trusty rusty crust");
        assert_eq!(r.score(&doc, None).unwrap(), 0.0);
    }

    #[test]
    fn test_boost_and_penalty_caps() {
        let r = rule(KeywordRuleConfig {
            boost_keywords: strings(&["good"]),
            penalty_keywords: strings(&["bad"]),
            ..Default::default()
        });
        let doc = Document::new("a", "good good bad");
        assert!((r.score(&doc, None).unwrap() - 0.4).abs() < 1e-9);

        let many_good = Document::new("b", &"good ".repeat(20));
        assert_eq!(r.score(&many_good, None).unwrap(), 2.0);

        let many_bad = Document::new("c", &"bad ".repeat(20));
        assert_eq!(r.score(&many_bad, None).unwrap(), -1.0);
    }

    #[test]
    fn test_keyword_weights_and_upper_bound() {
        let mut keyword_weights = BTreeMap::new();
        keyword_weights.insert("tokio".to_string(), 0.7);
        keyword_weights.insert("serde".to_string(), 5.0);
        let r = rule(KeywordRuleConfig {
            keyword_weights,
            ..Default::default()
        });
        let doc = Document::new("a", "built on Tokio");
        assert!((r.score(&doc, None).unwrap() - 0.7).abs() < 1e-9);
        let doc = Document::new("b", "tokio and serde");
        assert_eq!(r.score(&doc, None).unwrap(), 3.0);
    }

    #[test]
    fn test_query_terms_add_bonus() {
        let r = rule(KeywordRuleConfig::default());
        let doc = Document::new("a", "Machine learning with rust");
        // "is" and "ai" are too short, "machine" and "learning" match.
        let score = r.score(&doc, Some("is machine learning ai")).unwrap();
        assert!((score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let r = rule(KeywordRuleConfig {
            boost_keywords: strings(&["c++"]),
            ..Default::default()
        });
        let doc = Document::new("a", "no plus here: cxx");
        assert_eq!(r.score(&doc, None).unwrap(), 0.0);
    }
}
