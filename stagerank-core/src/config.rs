//! Configuration system for Stagerank.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment -> programmatic overrides.
//! The user-level file lives at `~/.config/stagerank/config.toml` (platform
//! equivalent via `directories`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::StageType;

/// Top-level configuration for a [`Retriever`](crate::retriever::Retriever).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    #[serde(default)]
    pub stages: EnabledStages,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub pre_rank: PreRankConfig,
    #[serde(default)]
    pub re_rank: ReRankConfig,
    #[serde(default)]
    pub rule_engine: RuleEngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Which stages run when a request carries no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledStages {
    #[serde(default = "default_true")]
    pub recall: bool,
    #[serde(default = "default_true")]
    pub pre_rank: bool,
    #[serde(default = "default_true")]
    pub re_rank: bool,
}

impl Default for EnabledStages {
    fn default() -> Self {
        Self {
            recall: true,
            pre_rank: true,
            re_rank: true,
        }
    }
}

impl EnabledStages {
    pub fn is_enabled(&self, stage: StageType) -> bool {
        match stage {
            StageType::Recall => self.recall,
            StageType::PreRank => self.pre_rank,
            StageType::ReRank => self.re_rank,
            StageType::Fallback => false,
        }
    }
}

/// Recall stage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Number of candidates requested from the vector store.
    #[serde(default = "default_recall_top_k")]
    pub top_k: usize,
    /// Candidates with a lower vector score are dropped. 0 disables filtering.
    #[serde(default)]
    pub score_threshold: f64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            top_k: default_recall_top_k(),
            score_threshold: 0.0,
        }
    }
}

/// Pre-rank stage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreRankConfig {
    #[serde(default = "default_pre_rank_top_k")]
    pub top_k: usize,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,
    /// BM25 term-frequency saturation.
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    /// BM25 length normalization, in [0, 1].
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for PreRankConfig {
    fn default() -> Self {
        Self {
            top_k: default_pre_rank_top_k(),
            bm25_weight: default_bm25_weight(),
            rule_weight: default_rule_weight(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

/// Re-rank stage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReRankConfig {
    #[serde(default = "default_re_rank_top_k")]
    pub top_k: usize,
    /// TTL for cached re-rank scores.
    #[serde(default = "default_re_rank_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Upper bound on a single reranker call. Must stay below
    /// `circuit_breaker.request_timeout_ms`.
    #[serde(default = "default_re_rank_timeout")]
    pub timeout_ms: u64,
}

impl Default for ReRankConfig {
    fn default() -> Self {
        Self {
            top_k: default_re_rank_top_k(),
            cache_ttl_secs: default_re_rank_cache_ttl(),
            timeout_ms: default_re_rank_timeout(),
        }
    }
}

impl ReRankConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Names of the built-in scoring rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Recency,
    Authority,
    Keyword,
    Length,
}

impl RuleKind {
    pub const ALL: [RuleKind; 4] = [
        RuleKind::Recency,
        RuleKind::Authority,
        RuleKind::Keyword,
        RuleKind::Length,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Recency => "recency",
            RuleKind::Authority => "authority",
            RuleKind::Keyword => "keyword",
            RuleKind::Length => "length",
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                ConfigError::invalid(format!(
                    "unknown rule '{s}' (expected one of: recency, authority, keyword, length)"
                ))
            })
    }
}

/// Rule engine: which rules run and their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    #[serde(default = "default_enabled_rules")]
    pub enabled_rules: Vec<RuleKind>,
    #[serde(default)]
    pub recency: RecencyRuleConfig,
    #[serde(default)]
    pub authority: AuthorityRuleConfig,
    #[serde(default)]
    pub keyword: KeywordRuleConfig,
    #[serde(default)]
    pub length: LengthRuleConfig,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            enabled_rules: default_enabled_rules(),
            recency: RecencyRuleConfig::default(),
            authority: AuthorityRuleConfig::default(),
            keyword: KeywordRuleConfig::default(),
            length: LengthRuleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyRuleConfig {
    #[serde(default = "default_recency_weight")]
    pub weight: f64,
    /// Window (in days) in which the score decays linearly from 1.0 to 0.5.
    #[serde(default = "default_recent_days")]
    pub recent_days: f64,
    /// Penalty applied to documents older than a year.
    #[serde(default = "default_older_penalty")]
    pub older_penalty: f64,
}

impl Default for RecencyRuleConfig {
    fn default() -> Self {
        Self {
            weight: default_recency_weight(),
            recent_days: default_recent_days(),
            older_penalty: default_older_penalty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityRuleConfig {
    #[serde(default = "default_authority_weight")]
    pub weight: f64,
    /// Merged over the built-in source table.
    #[serde(default)]
    pub source_weights: BTreeMap<String, f64>,
}

impl Default for AuthorityRuleConfig {
    fn default() -> Self {
        Self {
            weight: default_authority_weight(),
            source_weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRuleConfig {
    #[serde(default = "default_keyword_weight")]
    pub weight: f64,
    #[serde(default)]
    pub mandatory_keywords: Vec<String>,
    #[serde(default)]
    pub boost_keywords: Vec<String>,
    #[serde(default)]
    pub penalty_keywords: Vec<String>,
    #[serde(default)]
    pub keyword_weights: BTreeMap<String, f64>,
}

impl Default for KeywordRuleConfig {
    fn default() -> Self {
        Self {
            weight: default_keyword_weight(),
            mandatory_keywords: Vec::new(),
            boost_keywords: Vec::new(),
            penalty_keywords: Vec::new(),
            keyword_weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthRuleConfig {
    #[serde(default = "default_length_weight")]
    pub weight: f64,
    #[serde(default = "default_ideal_min_length")]
    pub ideal_min_length: usize,
    #[serde(default = "default_ideal_max_length")]
    pub ideal_max_length: usize,
    #[serde(default = "default_too_short_penalty")]
    pub too_short_penalty: f64,
    #[serde(default = "default_too_long_penalty")]
    pub too_long_penalty: f64,
}

impl Default for LengthRuleConfig {
    fn default() -> Self {
        Self {
            weight: default_length_weight(),
            ideal_min_length: default_ideal_min_length(),
            ideal_max_length: default_ideal_max_length(),
            too_short_penalty: default_too_short_penalty(),
            too_long_penalty: default_too_long_penalty(),
        }
    }
}

/// Available cache backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// In-process LRU with TTL.
    #[default]
    Memory,
    /// Accepts writes, never hits.
    Null,
}

/// Cache configuration, shared by result-level and re-rank-level caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Maximum number of entries held by the memory backend.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// TTL applied when a write does not specify one.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    /// TTL for cached retrieval results.
    #[serde(default = "default_cache_ttl")]
    pub result_ttl_secs: u64,
    /// Maximum number of background cache writes in flight.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            max_size: default_cache_max_size(),
            default_ttl_secs: default_cache_ttl(),
            result_ttl_secs: default_cache_ttl(),
            write_concurrency: default_write_concurrency(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Circuit breaker thresholds and the request deadline it guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    /// Seconds to wait after the last failure before probing again.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Deadline for a full pipeline run; exceeding it counts as a failure.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RetrieverConfig {
    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("recall.top_k", self.recall.top_k),
            ("pre_rank.top_k", self.pre_rank.top_k),
            ("re_rank.top_k", self.re_rank.top_k),
            ("cache.max_size", self.cache.max_size),
            ("cache.write_concurrency", self.cache.write_concurrency),
            (
                "circuit_breaker.failure_threshold",
                self.circuit_breaker.failure_threshold,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(format!("{field} must be > 0")));
            }
        }

        let non_negative = [
            ("recall.score_threshold", self.recall.score_threshold),
            ("pre_rank.bm25_weight", self.pre_rank.bm25_weight),
            ("pre_rank.rule_weight", self.pre_rank.rule_weight),
            ("pre_rank.bm25_k1", self.pre_rank.bm25_k1),
            ("rule_engine.recency.weight", self.rule_engine.recency.weight),
            ("rule_engine.authority.weight", self.rule_engine.authority.weight),
            ("rule_engine.keyword.weight", self.rule_engine.keyword.weight),
            ("rule_engine.length.weight", self.rule_engine.length.weight),
        ];
        for (field, value) in non_negative {
            if !(value >= 0.0) {
                return Err(ConfigError::invalid(format!("{field} must be >= 0")));
            }
        }

        if !(0.0..=1.0).contains(&self.pre_rank.bm25_b) {
            return Err(ConfigError::invalid(
                "pre_rank.bm25_b must be within [0, 1]",
            ));
        }
        if self.rule_engine.recency.recent_days <= 0.0 {
            return Err(ConfigError::invalid(
                "rule_engine.recency.recent_days must be > 0",
            ));
        }
        if self.re_rank.timeout_ms >= self.circuit_breaker.request_timeout_ms {
            return Err(ConfigError::invalid(
                "re_rank.timeout_ms must be below circuit_breaker.request_timeout_ms",
            ));
        }
        let length = &self.rule_engine.length;
        if length.ideal_min_length > length.ideal_max_length {
            return Err(ConfigError::invalid(
                "rule_engine.length.ideal_min_length must not exceed ideal_max_length",
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_recall_top_k() -> usize {
    100
}
fn default_pre_rank_top_k() -> usize {
    20
}
fn default_bm25_weight() -> f64 {
    0.7
}
fn default_rule_weight() -> f64 {
    0.3
}
fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_re_rank_top_k() -> usize {
    5
}
fn default_re_rank_cache_ttl() -> u64 {
    3600
}
fn default_re_rank_timeout() -> u64 {
    1500
}
fn default_enabled_rules() -> Vec<RuleKind> {
    vec![RuleKind::Recency, RuleKind::Authority, RuleKind::Keyword]
}
fn default_recency_weight() -> f64 {
    0.2
}
fn default_recent_days() -> f64 {
    7.0
}
fn default_older_penalty() -> f64 {
    0.1
}
fn default_authority_weight() -> f64 {
    0.3
}
fn default_keyword_weight() -> f64 {
    0.5
}
fn default_length_weight() -> f64 {
    0.1
}
fn default_ideal_min_length() -> usize {
    100
}
fn default_ideal_max_length() -> usize {
    2000
}
fn default_too_short_penalty() -> f64 {
    0.5
}
fn default_too_long_penalty() -> f64 {
    0.3
}
fn default_cache_max_size() -> usize {
    1000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_write_concurrency() -> usize {
    16
}
fn default_failure_threshold() -> usize {
    5
}
fn default_recovery_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    2000
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `STAGERANK_`, `__` separates sections)
/// 3. The explicit config file, if given
/// 4. User config (`~/.config/stagerank/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&RetrieverConfig>,
) -> Result<RetrieverConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RetrieverConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "stagerank", "stagerank") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // STAGERANK_PRE_RANK__TOP_K, STAGERANK_CACHE__BACKEND, etc.
    figment = figment.merge(Env::prefixed("STAGERANK_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RetrieverConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = RetrieverConfig::default();
        assert!(c.stages.recall && c.stages.pre_rank && c.stages.re_rank);
        assert_eq!(c.recall.top_k, 100);
        assert_eq!(c.pre_rank.top_k, 20);
        assert_eq!(c.pre_rank.bm25_k1, 1.5);
        assert_eq!(c.pre_rank.bm25_b, 0.75);
        assert_eq!(c.re_rank.top_k, 5);
        assert_eq!(c.re_rank.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(c.cache.backend, CacheBackend::Memory);
        assert_eq!(c.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            c.rule_engine.enabled_rules,
            vec![RuleKind::Recency, RuleKind::Authority, RuleKind::Keyword]
        );
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty() {
        let config: RetrieverConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RetrieverConfig::default());
    }

    #[test]
    fn test_unknown_rule_fails_fast() {
        let err = serde_json::from_str::<RuleEngineConfig>(r#"{"enabled_rules":["popularity"]}"#);
        assert!(err.is_err());
        assert!("popularity".parse::<RuleKind>().is_err());
        assert_eq!("length".parse::<RuleKind>().unwrap(), RuleKind::Length);
    }

    #[test]
    fn test_unknown_cache_backend_fails_fast() {
        let err = serde_json::from_str::<CacheConfig>(r#"{"backend":"memcached"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut c = RetrieverConfig::default();
        c.re_rank.top_k = 0;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("re_rank.top_k"));
    }

    #[test]
    fn test_validate_rejects_bad_bm25_b() {
        let mut c = RetrieverConfig::default();
        c.pre_rank.bm25_b = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_default_rerank_timeout_fits_request_deadline() {
        let c = RetrieverConfig::default();
        assert_eq!(c.re_rank.timeout(), Duration::from_millis(1500));
        assert!(c.re_rank.timeout() < c.circuit_breaker.request_timeout());
    }

    #[test]
    fn test_validate_rejects_rerank_timeout_past_deadline() {
        let mut c = RetrieverConfig::default();
        c.re_rank.timeout_ms = c.circuit_breaker.request_timeout_ms;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("re_rank.timeout_ms"));

        c.re_rank.timeout_ms = 3000;
        assert!(c.validate().is_err());

        c.circuit_breaker.request_timeout_ms = 5000;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_length_bounds() {
        let mut c = RetrieverConfig::default();
        c.rule_engine.length.ideal_min_length = 500;
        c.rule_engine.length.ideal_max_length = 100;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[stages]
re_rank = false

[pre_rank]
top_k = 7

[rule_engine]
enabled_rules = ["keyword", "length"]

[rule_engine.keyword]
mandatory_keywords = ["rust"]

[cache]
backend = "null"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()), None).unwrap();
        assert!(!config.stages.re_rank);
        assert_eq!(config.pre_rank.top_k, 7);
        assert_eq!(config.pre_rank.bm25_weight, 0.7);
        assert_eq!(
            config.rule_engine.enabled_rules,
            vec![RuleKind::Keyword, RuleKind::Length]
        );
        assert_eq!(config.rule_engine.keyword.mandatory_keywords, vec!["rust"]);
        assert_eq!(config.cache.backend, CacheBackend::Null);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/stagerank.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_config_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[circuit_breaker]\nfailure_threshold = 0").unwrap();
        let err = load_config(Some(file.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_load_config_overrides_win() {
        let mut overrides = RetrieverConfig::default();
        overrides.recall.top_k = 42;
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.recall.top_k, 42);
    }
}
