//! Retrieval metrics: request counters and latency percentiles.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::types::{RetrievalResult, StageType};

/// Number of recent latencies kept for percentile estimates.
const LATENCY_WINDOW: usize = 1024;

/// Counters for the requests served by one retriever.
#[derive(Debug)]
pub struct RetrievalMetrics {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fallbacks: u64,
    pub errors: u64,
    stage_counts: BTreeMap<StageType, u64>,
    latencies_ms: VecDeque<f64>,
    start_time: Instant,
}

impl Default for RetrievalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalMetrics {
    pub fn new() -> Self {
        Self {
            requests: 0,
            cache_hits: 0,
            cache_misses: 0,
            fallbacks: 0,
            errors: 0,
            stage_counts: BTreeMap::new(),
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
            start_time: Instant::now(),
        }
    }

    /// Record a finished request. `cache_checked` is false when the caller
    /// opted out of the result cache, so the request counts as neither hit nor miss.
    pub fn record(&mut self, result: &RetrievalResult, cache_checked: bool) {
        self.requests += 1;
        if cache_checked {
            if result.cache_hit {
                self.cache_hits += 1;
            } else {
                self.cache_misses += 1;
            }
        }
        if result.fallback_triggered {
            self.fallbacks += 1;
        }
        if result.metrics.error.is_some() {
            self.errors += 1;
        }
        *self.stage_counts.entry(result.stage).or_insert(0) += 1;

        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(result.latency_ms);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let avg_latency_ms = if self.latencies_ms.is_empty() {
            0.0
        } else {
            self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
        };
        let lookups = self.cache_hits + self.cache_misses;

        MetricsSnapshot {
            requests: self.requests,
            avg_latency_ms,
            p95_latency_ms: self.percentile(95.0),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                self.cache_hits as f64 / lookups as f64
            },
            fallbacks: self.fallbacks,
            errors: self.errors,
            stage_counts: self
                .stage_counts
                .iter()
                .map(|(stage, count)| (stage.as_str().to_string(), *count))
                .collect(),
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// Immutable snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub fallbacks: u64,
    pub errors: u64,
    /// Requests per terminal stage.
    pub stage_counts: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultMetrics;

    fn result(stage: StageType, latency_ms: f64) -> RetrievalResult {
        RetrievalResult {
            query: "q".into(),
            documents: Vec::new(),
            stage,
            latency_ms,
            cache_hit: false,
            fallback_triggered: false,
            metrics: ResultMetrics::default(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = RetrievalMetrics::new().snapshot();
        assert_eq!(snap.requests, 0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.p95_latency_ms, 0.0);
        assert_eq!(snap.cache_hit_rate, 0.0);
    }

    #[test]
    fn test_counts_outcomes() {
        let mut m = RetrievalMetrics::new();
        let mut hit = result(StageType::ReRank, 1.0);
        hit.cache_hit = true;
        m.record(&hit, true);
        m.record(&result(StageType::ReRank, 3.0), true);

        let mut fallback = result(StageType::Fallback, 5.0);
        fallback.fallback_triggered = true;
        fallback.metrics.error = Some("down".into());
        m.record(&fallback, false);

        let snap = m.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hit_rate, 0.5);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.stage_counts["re_rank"], 2);
        assert_eq!(snap.stage_counts["fallback"], 1);
        assert!((snap.avg_latency_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_p95() {
        let mut m = RetrievalMetrics::new();
        for i in 1..=100 {
            m.record(&result(StageType::PreRank, i as f64), false);
        }
        assert_eq!(m.snapshot().p95_latency_ms, 95.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut m = RetrievalMetrics::new();
        for _ in 0..(LATENCY_WINDOW + 10) {
            m.record(&result(StageType::Recall, 1.0), false);
        }
        assert_eq!(m.latencies_ms.len(), LATENCY_WINDOW);
        assert_eq!(m.requests as usize, LATENCY_WINDOW + 10);
    }
}
