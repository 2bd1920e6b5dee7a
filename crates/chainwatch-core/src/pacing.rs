//! Delay between consecutive per-rule log queries within one flush.

use std::time::Duration;

/// Computes the pause inserted between two provider queries.
///
/// `consecutive_throttles` is the number of rate-limited responses seen in a
/// row immediately before this pause; it resets to zero on any other outcome.
pub trait PacingPolicy: Send + Sync + std::fmt::Debug {
    fn delay(&self, consecutive_throttles: u32) -> Duration;
}

/// Default pause between rule queries.
pub const DEFAULT_PACING: Duration = Duration::from_millis(2000);

/// Constant pause regardless of provider responses.
#[derive(Debug, Clone)]
pub struct FixedPacing {
    pub interval: Duration,
}

impl FixedPacing {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedPacing {
    fn default() -> Self {
        Self::new(DEFAULT_PACING)
    }
}

impl PacingPolicy for FixedPacing {
    fn delay(&self, _consecutive_throttles: u32) -> Duration {
        self.interval
    }
}

/// Pause that grows exponentially while the provider keeps throttling.
#[derive(Debug, Clone)]
pub struct BackoffPacing {
    /// Pause used when the previous query was not throttled.
    pub base: Duration,
    /// Upper bound for the grown pause.
    pub max: Duration,
    /// Growth factor per consecutive throttled response.
    pub multiplier: f64,
}

impl Default for BackoffPacing {
    fn default() -> Self {
        Self {
            base: DEFAULT_PACING,
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl PacingPolicy for BackoffPacing {
    fn delay(&self, consecutive_throttles: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let grown = base_ms * self.multiplier.powi(consecutive_throttles.min(32) as i32);
        let capped = grown.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
