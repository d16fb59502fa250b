//! Three-state circuit breaker shared by every request on a retriever.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Position in the Closed → Open → HalfOpen cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Rejecting calls. `since` is the most recent failure.
    Open { since: Instant },
    /// A single trial call is let through to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trips after `threshold` consecutive failures. While tripped, calls are
/// refused until `cool_down` has passed since the last failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: usize,
    threshold: usize,
    cool_down: Duration,
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: String,
    pub failure_count: usize,
    pub failure_threshold: usize,
    pub recovery_timeout_secs: f64,
}

impl CircuitBreaker {
    /// A zero `threshold` is raised to 1.
    pub fn new(threshold: usize, cool_down: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            threshold: threshold.max(1),
            cool_down,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.recovery_timeout())
    }

    /// Gate for the next call. An open breaker whose cool-down has elapsed
    /// admits the call as a half-open trial.
    pub fn is_call_permitted(&mut self) -> bool {
        let CircuitState::Open { since } = self.state else {
            return true;
        };
        let waited = since.elapsed();
        if waited < self.cool_down {
            return false;
        }
        debug!(
            waited_ms = waited.as_millis() as u64,
            "Cool-down elapsed, admitting trial call"
        );
        self.state = CircuitState::HalfOpen;
        true
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!(previous = %self.state, "Circuit breaker closing");
        }
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let now = Instant::now();
        match self.state {
            CircuitState::HalfOpen => {
                warn!(
                    failures = self.consecutive_failures,
                    "Half-open trial call failed, circuit breaker reopening"
                );
                self.state = CircuitState::Open { since: now };
            }
            CircuitState::Open { .. } => {
                self.state = CircuitState::Open { since: now };
            }
            CircuitState::Closed if self.consecutive_failures >= self.threshold => {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.threshold,
                    "Circuit breaker opening"
                );
                self.state = CircuitState::Open { since: now };
            }
            CircuitState::Closed => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> usize {
        self.consecutive_failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state.as_str().to_string(),
            failure_count: self.consecutive_failures,
            failure_threshold: self.threshold,
            recovery_timeout_secs: self.cool_down.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_call_permitted());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_success_resets_counter() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(!cb.is_call_permitted());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_call_permitted());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(10));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_call_permitted());

        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
        // The recovery clock restarted.
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_stats() {
        let mut cb = CircuitBreaker::from_config(&CircuitBreakerConfig::default());
        cb.record_failure();
        let stats = cb.stats();
        assert_eq!(stats.state, "closed");
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.failure_threshold, 5);
        assert_eq!(stats.recovery_timeout_secs, 30.0);
    }
}
