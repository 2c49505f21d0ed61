//! Per-backend circuit breaker.
//!
//! Trips after `failure_threshold` consecutive strikes, stays open for the
//! cool-down, then lets exactly one probe through.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Calls are permitted.
    Closed,
    /// Calls are blocked until the cool-down elapses.
    Open { since: Instant },
    /// One probe call is permitted.
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    strikes: u32,
    failure_threshold: u32,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            strikes: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            probe_in_flight: false,
        }
    }

    /// Whether a call may go through now. Moves Open → HalfOpen once the
    /// cool-down has elapsed and claims the single probe slot.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    debug!("circuit half-open, allowing one probe");
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Side-effect free view used for status reports and skip decisions.
    pub fn is_open(&self) -> bool {
        match self.state {
            CircuitState::Open { since } => since.elapsed() < self.cooldown,
            _ => false,
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            debug!("probe succeeded, circuit closed");
        }
        self.strikes = 0;
        self.probe_in_flight = false;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.strikes += 1;
        self.probe_in_flight = false;
        let reopen = self.state == CircuitState::HalfOpen;
        if reopen || self.strikes >= self.failure_threshold {
            warn!(
                strikes = self.strikes,
                threshold = self.failure_threshold,
                "circuit opening"
            );
            self.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// A cancelled call says nothing about the backend; release the probe.
    pub fn release(&mut self) {
        self.probe_in_flight = false;
    }

    pub fn reset(&mut self) {
        self.strikes = 0;
        self.probe_in_flight = false;
        self.state = CircuitState::Closed;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn strikes(&self) -> u32 {
        self.strikes
    }
}

/// Serializable breaker report for one backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerStatus {
    pub backend: String,
    pub state: &'static str,
    pub strikes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.try_acquire());
    }

    #[test]
    fn success_resets_strikes() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.strikes(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_single_probe() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure();
        assert!(!cb.try_acquire());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire());
        cb.record_failure();
        assert!(cb.is_open());
    }
}
