//! Exponential reconnect backoff with proportional jitter.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay schedule: `min(base * 2^attempt, cap)` plus up to
/// `jitter_ratio` of that value.
///
/// `attempt` counts consecutive closes and is reset only by a successful
/// open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            base,
            cap: cap.max(base),
            jitter_ratio,
            attempt: 0,
        }
    }

    /// Number of closes since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Largest delay this schedule can ever produce.
    pub fn max_delay(&self) -> Duration {
        self.cap + self.cap.mul_f64(self.jitter_ratio)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for the current attempt before jitter.
    pub fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Record a close and return the delay before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::rng().random_range(0.0..=self.jitter_ratio);
        self.next_delay_with(jitter)
    }

    /// Like [`Backoff::next_delay`] with a caller-chosen jitter fraction,
    /// clamped to the configured ratio.
    pub fn next_delay_with(&mut self, jitter: f64) -> Duration {
        let delay = self.base_delay();
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, self.jitter_ratio)
        } else {
            0.0
        };
        self.attempt = self.attempt.saturating_add(1);
        delay + delay.mul_f64(jitter)
    }
}
