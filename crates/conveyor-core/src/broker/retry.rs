//! Redelivery backoff policy.

use std::time::Duration;

/// Exponential backoff for redelivered messages.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first redelivery.
    pub base_delay: Duration,

    /// Multiplier applied per additional delivery.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// Delay before redelivering a message that has been delivered
    /// `deliveries` times already (1-indexed).
    ///
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, 16s, ...
    pub fn next_delay(&self, deliveries: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(deliveries.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}
