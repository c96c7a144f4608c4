//! Reconnection policy
//!
//! Exponential backoff with jitter between session reconnection attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff with jitter, reset after a successful logon
#[derive(Debug)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
    max_attempts: u32,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial_delay = Duration::from_millis(config.initial_delay_ms);
        Self {
            initial_delay,
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            max_attempts: config.max_attempts,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once `max_attempts` is used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        let scaled = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = if scaled.is_finite() {
            Duration::from_secs_f64(scaled).min(self.max_delay)
        } else {
            self.max_delay
        };

        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn should_retry(&self) -> bool {
        self.max_attempts == 0 || self.attempt_count < self.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

        Duration::from_millis((base_millis + jitter).max(1.0) as u64)
    }
}
