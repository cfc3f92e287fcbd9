//! Reconnect pacing shared by the link and session supervisors.
//!
//! Delays grow exponentially from `initial` and are capped at `max`. Every delay is spread by a
//! random factor within `±jitter` so a fleet of nodes does not reconnect in lockstep after a
//! broker or access point restart.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_ms),
            Duration::from_millis(config.max_ms),
            config.jitter,
        )
    }

    /// Delay before reconnect attempt `attempt`, counting from 1. Never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self.initial.saturating_mul(1u32 << exponent).min(self.max);
        if self.jitter == 0.0 {
            return base;
        }

        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = base.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.max(0.0)).min(self.max)
    }
}
