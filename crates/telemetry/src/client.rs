// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry send pipeline: channel → retry → breaker → spill queue → flush.
//!
//! `send` only hands the payload to a bounded channel; a single background
//! worker owns the network and (with the flush loop) the persistent queue,
//! so callers never block on I/O. Payloads that cannot be delivered spill to
//! the durable queue and are drained by the flush loop once the endpoint
//! recovers.

use crate::breaker::{CircuitBreaker, CircuitOpen};
use crate::retry::RetryPolicy;
use crate::sender::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_core::{Clock, MetricsRegistry, SupervisorConfig, SystemClock, TelemetryPayload};
use vigil_storage::PersistentQueue;

/// Settings for the telemetry client, lifted from the supervisor record.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub flush_interval: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    /// In-memory channel capacity before sends spill to disk
    pub channel_capacity: usize,
    /// Entries drained from the queue per flush pass
    pub batch_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_supervisor(&SupervisorConfig::default())
    }
}

impl TelemetryConfig {
    pub fn from_supervisor(config: &SupervisorConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            circuit_failure_threshold: config.circuit_failure_threshold,
            circuit_timeout: config.circuit_timeout,
            retry_max_attempts: config.retry_max_attempts,
            retry_initial_delay: config.retry_initial_delay,
            channel_capacity: 256,
            batch_size: 50,
        }
    }
}

/// Why a payload could not be delivered right now.
enum DeliverError {
    /// Breaker refused without an attempt
    Refused,
    /// Every retry attempt failed
    Exhausted,
}

struct ClientInner<S: Sender, C: Clock> {
    config: TelemetryConfig,
    sender: S,
    breaker: CircuitBreaker<C>,
    policy: RetryPolicy,
    queue: Mutex<PersistentQueue>,
    metrics: Arc<MetricsRegistry>,
    tx: mpsc::Sender<TelemetryPayload>,
    rx: Mutex<Option<mpsc::Receiver<TelemetryPayload>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Cancelled when the queue reports an I/O error; durability is gone at
    /// that point and the supervisor shuts down.
    fatal: CancellationToken,
}

/// Cloneable handle to the telemetry pipeline.
pub struct TelemetryClient<S: Sender, C: Clock = SystemClock> {
    inner: Arc<ClientInner<S, C>>,
}

impl<S: Sender, C: Clock> Clone for TelemetryClient<S, C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: Sender> TelemetryClient<S, SystemClock> {
    pub fn new(
        config: TelemetryConfig,
        queue: PersistentQueue,
        metrics: Arc<MetricsRegistry>,
        sender: S,
    ) -> Self {
        Self::with_clock(config, queue, metrics, sender, SystemClock)
    }
}

impl<S: Sender, C: Clock> TelemetryClient<S, C> {
    pub fn with_clock(
        config: TelemetryConfig,
        queue: PersistentQueue,
        metrics: Arc<MetricsRegistry>,
        sender: S,
        clock: C,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let breaker = CircuitBreaker::with_clock(
            config.circuit_failure_threshold,
            config.circuit_timeout,
            clock,
        );
        let policy = RetryPolicy::new(config.retry_max_attempts, config.retry_initial_delay);
        Self {
            inner: Arc::new(ClientInner {
                config,
                sender,
                breaker,
                policy,
                queue: Mutex::new(queue),
                metrics,
                tx,
                rx: Mutex::new(Some(rx)),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                fatal: CancellationToken::new(),
            }),
        }
    }

    /// Hand a payload to the send worker. Never blocks: when the channel is
    /// full (or the client is stopped) the payload spills straight to the
    /// persistent queue.
    pub fn send(&self, payload: TelemetryPayload) {
        match self.inner.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(payload)) | Err(TrySendError::Closed(payload)) => {
                tracing::debug!(id = %payload.id, "send channel unavailable, spilling");
                self.spill(&payload);
            }
        }
    }

    /// Spawn the send worker and flush loop.
    pub fn start(&self) {
        let Some(rx) = self.inner.rx.lock().take() else {
            tracing::warn!("telemetry client already started");
            return;
        };
        let worker = tokio::spawn(self.clone().send_worker(rx));
        let flusher = tokio::spawn(self.clone().flush_loop());
        self.inner.tasks.lock().extend([worker, flusher]);
        tracing::info!("telemetry client started");
    }

    /// Stop both tasks and run one final flush attempt. Idempotent.
    pub async fn stop(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        // Never started: the channel buffer was never owned by a worker.
        let leftover = self.inner.rx.lock().take();
        if let Some(mut rx) = leftover {
            while let Ok(payload) = rx.try_recv() {
                self.spill(&payload);
            }
        }
        let attempted = self.flush().await;
        tracing::info!(final_flush_attempted = attempted, "telemetry client stopped");
    }

    /// One opportunistic drain pass over the persistent queue. Returns the
    /// number of entries attempted. FIFO: a failing head entry blocks the
    /// rest of the batch until it delivers.
    pub async fn flush(&self) -> usize {
        if self.inner.breaker.is_open() {
            return 0;
        }
        let batch = self.inner.queue.lock().peek_batch(self.inner.config.batch_size);
        let mut attempted = 0;
        for entry in batch {
            attempted += 1;
            match self.try_deliver(&entry.payload).await {
                Ok(()) => {
                    self.inner.metrics.incr("telemetry.sent");
                    self.inner.metrics.incr("telemetry.flushed");
                    let removed = self.inner.queue.lock().remove(entry.id);
                    if let Err(e) = removed {
                        self.queue_fault("removing flushed entry", &e);
                        break;
                    }
                }
                Err(DeliverError::Exhausted) => {
                    let recorded = self.inner.queue.lock().record_attempt(entry.id);
                    if let Err(e) = recorded {
                        self.queue_fault("recording attempt", &e);
                    }
                    break;
                }
                Err(DeliverError::Refused) => break,
            }
        }
        self.publish_depth();
        attempted
    }

    /// Current number of entries in the persistent queue.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Token cancelled on unrecoverable queue I/O errors.
    pub fn fatal_token(&self) -> CancellationToken {
        self.inner.fatal.clone()
    }

    async fn send_worker(self, mut rx: mpsc::Receiver<TelemetryPayload>) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(payload) => self.process(payload).await,
                    None => break,
                },
            }
        }
        // Drain anything still buffered so the final flush can pick it up.
        while let Ok(payload) = rx.try_recv() {
            self.spill(&payload);
        }
        tracing::debug!("telemetry send worker exited");
    }

    async fn flush_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race startup; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let attempted = self.flush().await;
                    if attempted > 0 {
                        tracing::debug!(attempted, "flush pass");
                    }
                }
            }
        }
        tracing::debug!("telemetry flush loop exited");
    }

    async fn process(&self, payload: TelemetryPayload) {
        match self.try_deliver(&payload).await {
            Ok(()) => self.inner.metrics.incr("telemetry.sent"),
            Err(_) => self.spill(&payload),
        }
    }

    /// Run one payload through breaker + retry. Does not touch the queue.
    async fn try_deliver(&self, payload: &TelemetryPayload) -> Result<(), DeliverError> {
        let permit = match self.inner.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(CircuitOpen) => {
                self.inner.metrics.incr("telemetry.refused");
                return Err(DeliverError::Refused);
            }
        };
        let max_attempts = self.inner.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.inner.sender.post(payload).await {
                Ok(()) => {
                    self.inner.metrics.observe("telemetry.post_ms", started.elapsed());
                    permit.success();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        id = %payload.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "telemetry post failed"
                    );
                    if attempt < max_attempts {
                        let delay = self.inner.policy.delay_for(attempt);
                        tokio::select! {
                            _ = self.inner.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
        permit.failure();
        Err(DeliverError::Exhausted)
    }

    fn spill(&self, payload: &TelemetryPayload) {
        let pushed = self.inner.queue.lock().push(payload);
        match pushed {
            Ok(id) => {
                self.inner.metrics.incr("telemetry.spilled");
                tracing::debug!(id, kind = %payload.kind, "payload spilled to queue");
            }
            Err(e) => self.queue_fault("spilling payload", &e),
        }
        self.publish_depth();
    }

    fn queue_fault(&self, context: &str, error: &vigil_storage::QueueError) {
        self.inner.metrics.incr("telemetry.queue_errors");
        tracing::error!(context, error = %error, "persistent queue failure");
        self.inner.fatal.cancel();
    }

    fn publish_depth(&self) {
        let depth = self.inner.queue.lock().len();
        self.inner.metrics.set_gauge("telemetry.queue_depth", depth as f64);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
