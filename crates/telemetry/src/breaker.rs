// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Three-state circuit breaker guarding the telemetry endpoint.
//!
//! The caller acquires a permit before attempting a call and reports the
//! outcome on it, which lets the send pipeline distinguish "refused by the
//! breaker" from "attempted and failed". HalfOpen admits exactly one probe;
//! a permit dropped without a report is released as a failure so a crashed
//! probe task can never wedge the breaker.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use vigil_core::{Clock, SystemClock};

/// Returned when the breaker refuses a call outright.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Breaker over a failure-counted callable.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    failure_threshold: u32,
    timeout: Duration,
    clock: C,
    inner: Mutex<Inner>,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self::with_clock(failure_threshold, timeout, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(failure_threshold: u32, timeout: Duration, clock: C) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            timeout,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask to make one call. `Err(CircuitOpen)` means refused without any
    /// attempt; otherwise report the outcome on the returned permit.
    pub fn try_acquire(&self) -> Result<Permit<'_, C>, CircuitOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map_or(true, |at| self.clock.now().duration_since(at) >= self.timeout);
                if !expired {
                    return Err(CircuitOpen);
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                tracing::info!("circuit breaker half-open, admitting probe");
                Ok(Permit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(CircuitOpen);
                }
                inner.probe_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True when calls would currently be refused.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.state, CircuitState::Open)
            && inner
                .opened_at
                .is_some_and(|at| self.clock.now().duration_since(at) < self.timeout)
    }

    fn on_success(&self, _was_probe: bool) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn on_failure(&self, was_probe: bool) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
        if was_probe {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            tracing::warn!("circuit breaker probe failed, reopening");
            return;
        }
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            tracing::warn!(
                failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }
}

/// Outcome reporter for one admitted call.
pub struct Permit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    was_probe: bool,
    reported: bool,
}

impl<'a, C: Clock> Permit<'a, C> {
    fn new(breaker: &'a CircuitBreaker<C>, was_probe: bool) -> Self {
        Self { breaker, was_probe, reported: false }
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.was_probe);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.was_probe);
    }
}

impl<C: Clock> Drop for Permit<'_, C> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.on_failure(self.was_probe);
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
