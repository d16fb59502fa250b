//! Recency rule: newer documents score higher.
//!
//! Reads `publish_date` metadata as a Unix timestamp (seconds) or an RFC 3339 /
//! `YYYY-MM-DD` string. Scores are bounded to [-1, 1]:
//!
//! | Age | Score |
//! |---|---|
//! | within `recent_days` | 1.0 decaying linearly to 0.5 |
//! | under 30 days | 0.5 |
//! | under a year | 0.2 |
//! | older | `-older_penalty` |
//!
//! Documents without `publish_date` score 0.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::Rule;
use crate::config::RecencyRuleConfig;
use crate::error::RuleError;
use crate::types::Document;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct RecencyRule {
    weight: f64,
    recent_days: f64,
    older_penalty: f64,
}

impl RecencyRule {
    pub fn new(config: &RecencyRuleConfig) -> Self {
        Self {
            weight: config.weight,
            recent_days: config.recent_days,
            older_penalty: config.older_penalty,
        }
    }

    /// Score relative to an explicit clock.
    pub fn score_at(&self, document: &Document, now: DateTime<Utc>) -> Result<f64, RuleError> {
        let Some(value) = document.metadata.get("publish_date") else {
            return Ok(0.0);
        };
        let published = parse_publish_date(value)?;
        let days_old = ((now - published).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);

        let score = if days_old < self.recent_days {
            1.0 - (days_old / self.recent_days) * 0.5
        } else if days_old < 30.0 {
            0.5
        } else if days_old < 365.0 {
            0.2
        } else {
            -self.older_penalty
        };
        Ok(score.clamp(-1.0, 1.0))
    }
}

fn parse_publish_date(value: &Value) -> Result<DateTime<Utc>, RuleError> {
    let invalid = |reason: String| RuleError::InvalidMetadata {
        field: "publish_date".into(),
        reason,
    };

    match value {
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| invalid(format!("unrepresentable timestamp {n}")))?;
            DateTime::from_timestamp(secs as i64, 0)
                .ok_or_else(|| invalid(format!("timestamp {secs} out of range")))
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or_else(|| invalid(format!("unrecognized date '{s}'")))
        }
        other => Err(invalid(format!("expected number or string, got {other}"))),
    }
}

impl Rule for RecencyRule {
    fn name(&self) -> &str {
        "recency"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, document: &Document, _query: Option<&str>) -> Result<f64, RuleError> {
        self.score_at(document, Utc::now())
    }
}
