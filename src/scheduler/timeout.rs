//! Deadline race for the cancellable phase of a request.
//!
//! The computation runs on the dedicated timeout pool while the coordinating
//! task waits for at most the configured duration. When the deadline wins the
//! request fails with [`RequestError::TimedOut`]. A computation that already
//! started is not interrupted: it keeps its pool thread until it returns on
//! its own and its result is discarded. One still queued is never started,
//! since the request's access has been released by then.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::thread_pool::{ThreadPool, ThreadPoolConfig, ThreadPoolError, ThreadPoolStats};
use crate::error::RequestError;
use crate::telemetry;

pub struct TimeoutGuard {
    timeout: Duration,
    pool: ThreadPool,
}

impl TimeoutGuard {
    pub fn new(timeout: Duration, pool: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        Ok(Self { timeout, pool: ThreadPool::new(pool)? })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `work` on the timeout pool and wait up to the deadline for it.
    ///
    /// Faults raised by `work` come back unchanged. A panic is reported as
    /// [`RequestError::Panicked`].
    pub async fn race<V, F>(&self, work: F) -> Result<V, RequestError>
    where
        F: FnOnce() -> Result<V, RequestError> + Send + 'static,
        V: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let gate = StartGate::new();
        let worker_gate = gate.clone();
        self.pool.submit(Box::new(move || {
            if !worker_gate.try_start() {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(RequestError::panicked(payload)));
            // The receiver is gone when the deadline already fired.
            let _ = tx.send(outcome);
        }))?;

        let waiting = AbandonOnDrop(gate);
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::Abandoned),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                if waiting.0.abandon() {
                    tracing::warn!(timeout_ms, "request timed out before its computation started");
                } else {
                    tracing::warn!(
                        timeout_ms,
                        "request timed out; computation left running in background"
                    );
                }
                telemetry::record_request_timeout();
                Err(RequestError::TimedOut(self.timeout))
            }
        }
    }

    pub fn pool_stats(&self) -> ThreadPoolStats {
        self.pool.stats()
    }

    /// Stop accepting work. Running computations are left to finish.
    pub fn shutdown(&self) {
        self.pool.signal_shutdown();
    }
}

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

/// Start/abandon handshake between a queued task and its waiter. Whichever
/// side leaves `QUEUED` first decides whether the work runs.
#[derive(Clone)]
struct StartGate(Arc<AtomicU8>);

impl StartGate {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(QUEUED)))
    }

    fn try_start(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True when the work had not started and now never will.
    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Abandons still-queued work when the waiter goes away, by timeout or by
/// being dropped.
struct AbandonOnDrop(StartGate);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.abandon();
    }
}
