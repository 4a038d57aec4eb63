//! Delay calculator for connection retries

use std::time::Duration;

/// How the delay grows from one attempt to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// `initial × (attempt + 1)`
    Linear,
    /// `initial × multiplier^attempt`
    Exponential,
}

/// Backoff strategy for connection retries.
///
/// Delays are capped at a configurable maximum.
///
/// # Example
///
/// ```
/// use mssec_connection::reconnect::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::linear(100);
/// assert_eq!(backoff.calculate_delay(0), Duration::from_millis(100));
/// assert_eq!(backoff.calculate_delay(1), Duration::from_millis(200));
///
/// let backoff = BackoffStrategy::new(100, 30_000);
/// assert_eq!(backoff.calculate_delay(1), Duration::from_millis(200));
/// assert_eq!(backoff.calculate_delay(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    /// Delay in milliseconds before the first retry
    initial_ms: u64,
    /// Cap in milliseconds
    max_ms: u64,
    /// Multiplier for exponential growth (default: 2.0)
    multiplier: f64,
    growth: Growth,
}

impl BackoffStrategy {
    /// Exponential backoff with the given initial and maximum delays.
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms: initial_ms.max(1),
            max_ms: max_ms.max(initial_ms),
            multiplier: 2.0,
            growth: Growth::Exponential,
        }
    }

    /// Linear backoff: `step_ms`, `2 × step_ms`, `3 × step_ms`, ...
    pub fn linear(step_ms: u64) -> Self {
        Self {
            initial_ms: step_ms.max(1),
            max_ms: u64::MAX,
            multiplier: 1.0,
            growth: Growth::Linear,
        }
    }

    /// Set the multiplier for exponential growth.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_ms: u64) -> Self {
        self.max_ms = max_ms.max(self.initial_ms);
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = match self.growth {
            Growth::Linear => self.initial_ms.saturating_mul(u64::from(attempt) + 1),
            Growth::Exponential => {
                let raw = (self.initial_ms as f64) * self.multiplier.powi(attempt as i32);
                raw.min(self.max_ms as f64) as u64
            }
        };
        Duration::from_millis(delay_ms.min(self.max_ms))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn growth(&self) -> Growth {
        self.growth
    }
}

impl Default for BackoffStrategy {
    /// 100ms, 200ms, 300ms, ...
    fn default() -> Self {
        Self::linear(100)
    }
}
