//! Circuit breaker for the completion service
//!
//! Stops hammering a service that keeps failing. After `threshold`
//! consecutive hard failures the breaker opens and requests are refused
//! until `cooldown` has passed; then one request is let through to probe
//! recovery.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Too many failures - reject requests immediately
    Open,
    /// Cooldown elapsed - allow a probe request
    HalfOpen,
}

/// Lock-free failure counter with a cooldown
///
/// # Example
///
/// ```
/// use scribe_agent::CircuitBreaker;
/// use std::time::Duration;
///
/// let cb = CircuitBreaker::new(2, Duration::from_secs(30));
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    // Millis since `epoch` of the most recent failure
    last_failure_ms: AtomicU64,
    epoch: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn since_last_failure(&self) -> Duration {
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            CircuitState::Closed
        } else if self.since_last_failure() >= self.cooldown {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Record a successful call (closes the circuit)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// `false` only while open
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Time until a probe is allowed, zero unless open
    pub fn time_until_retry(&self) -> Duration {
        match self.state() {
            CircuitState::Open => self.cooldown.saturating_sub(self.since_last_failure()),
            CircuitState::Closed | CircuitState::HalfOpen => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        // 3 consecutive failures, 60 second cooldown
        Self::new(3, Duration::from_secs(60))
    }
}
