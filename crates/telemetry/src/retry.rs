// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with cap and jitter.

use rand::Rng;
use std::time::Duration;

/// Default ceiling on a single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry schedule for one send: `max_attempts` tries, delays doubling from
/// `initial_delay` up to `max_delay`, each jittered down by up to half to
/// spread retries from a fleet of gateways.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self { max_attempts, initial_delay, factor: 2.0, max_delay: DEFAULT_MAX_DELAY }
    }

    /// Capped exponential delay after the `attempt`-th failure (1-based),
    /// before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exp as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay after the `attempt`-th failure: uniform in
    /// `[base/2, base]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let scale: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(scale)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
