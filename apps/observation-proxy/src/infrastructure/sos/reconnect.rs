//! Reconnection Backoff
//!
//! Exponential backoff with jitter used when a streaming WebSocket drops
//! or a poll fails. Streams retry until their session is stopped, so there
//! is no attempt limit.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Stateful backoff sequence.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start a new sequence.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Delay before the next retry; grows the following delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.jittered(self.current);

        let grown = self.current.mul_f64(self.config.multiplier.max(1.0));
        self.current = grown.min(self.config.max_delay);
        delay
    }

    /// Retries since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Back to the initial delay after a healthy connection.
    pub const fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = self.config.jitter_factor.min(1.0);
        let factor = rand::rng().random_range(1.0 - spread..=1.0 + spread);
        delay.mul_f64(factor).max(Duration::from_millis(1))
    }
}
