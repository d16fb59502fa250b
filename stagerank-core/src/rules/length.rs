//! Length rule: prefers documents inside an ideal character range.
//!
//! Score bounded to [0, 1].

use super::Rule;
use crate::config::LengthRuleConfig;
use crate::error::RuleError;
use crate::types::Document;

#[derive(Debug, Clone)]
pub struct LengthRule {
    weight: f64,
    ideal_min: usize,
    ideal_max: usize,
    too_short_penalty: f64,
    too_long_penalty: f64,
}

impl LengthRule {
    pub fn new(config: &LengthRuleConfig) -> Self {
        Self {
            weight: config.weight,
            ideal_min: config.ideal_min_length,
            ideal_max: config.ideal_max_length,
            too_short_penalty: config.too_short_penalty,
            too_long_penalty: config.too_long_penalty,
        }
    }

    fn score_length(&self, len: usize) -> f64 {
        let (len, min, max) = (len as f64, self.ideal_min as f64, self.ideal_max as f64);

        if len >= min && len <= max {
            // 1.0 at the midpoint, 0.5 at either edge.
            let half_range = (max - min) / 2.0;
            if half_range <= 0.0 {
                return 1.0;
            }
            let distance = (len - (min + max) / 2.0).abs();
            1.0 - distance / half_range * 0.5
        } else if len < min {
            (len / min - self.too_short_penalty).max(0.0)
        } else if len < max * 2.0 {
            let excess_ratio = (len - max) / max;
            (1.0 - excess_ratio * self.too_long_penalty).max(0.0)
        } else {
            0.0
        }
    }
}

impl Rule for LengthRule {
    fn name(&self) -> &str {
        "length"
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn score(&self, document: &Document, _query: Option<&str>) -> Result<f64, RuleError> {
        let chars = document.content.chars().count();
        Ok(self.score_length(chars).clamp(0.0, 1.0))
    }
}
