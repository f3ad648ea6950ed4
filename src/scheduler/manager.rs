//! Request manager: the public face of the scheduler.
//!
//! Composes admission control, the request registry and the optional
//! timeout guard into `run_read`, `run_write`, `cancel_all` and `shutdown`.
//!
//! Per request: register, wait for access in the right mode, run the
//! computation (under the timeout guard when configured), release access,
//! unregister, record the terminal state, resolve the caller's handle.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::Instrument;

use super::access::{AccessCoordinator, AccessSnapshot};
use super::cancel::CancelIndicator;
use super::registry::{Registration, RequestRegistry};
use super::request::{Request, RequestHandle, RequestId, RequestKind, RequestState};
use super::thread_pool::{ThreadPoolError, ThreadPoolStats};
use super::timeout::TimeoutGuard;
use crate::config::RequestManagerConfig;
use crate::error::RequestError;
use crate::telemetry::{self, RequestSpan, SpanExt};

/// Manager lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    Running,
    Draining,
    Stopped,
}

impl ManagerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Serializable view of the manager for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub state: ManagerState,
    pub active_requests: usize,
    pub access: AccessSnapshot,
    pub timeout_secs: Option<u64>,
    pub timeout_pool: Option<ThreadPoolStats>,
}

struct ManagerInner {
    access: AccessCoordinator,
    registry: RequestRegistry,
    timeout: Option<TimeoutGuard>,
    cancel_on_write: bool,
    next_id: AtomicU64,
    state: AtomicU8,
}

/// Schedules reads and writes against shared state.
///
/// Cheap to clone; clones share all scheduling state. Submission methods must
/// be called from within a Tokio runtime.
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl RequestManager {
    /// Create a manager. Fails only if the timeout pool cannot start.
    pub fn new(config: RequestManagerConfig) -> Result<Self, ThreadPoolError> {
        let timeout = match config.timeout {
            Some(duration) => Some(TimeoutGuard::new(duration, config.timeout_pool)?),
            None => None,
        };

        tracing::info!(
            timeout_secs = config.timeout.map(|t| t.as_secs()),
            cancel_on_write = config.cancel_on_write,
            "request manager started"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                access: AccessCoordinator::new(),
                registry: RequestRegistry::new(),
                timeout,
                cancel_on_write: config.cancel_on_write,
                next_id: AtomicU64::new(1),
                state: AtomicU8::new(ManagerState::Running as u8),
            }),
        })
    }

    /// Create a manager configured from the process environment.
    pub fn from_env() -> Result<Self, ThreadPoolError> {
        Self::new(RequestManagerConfig::from_env())
    }

    /// Submit a read. Runs concurrently with other reads, never with a write.
    ///
    /// The computation always runs once admitted, even if its indicator is
    /// already cancelled; it decides for itself how to react.
    pub fn run_read<V, F>(&self, computation: F) -> RequestHandle<V>
    where
        F: FnOnce(&CancelIndicator) -> Result<V, RequestError> + Send + 'static,
        V: Send + 'static,
    {
        let Some((registration, tx, rx)) = self.admit(RequestKind::Read) else {
            return self.rejected();
        };
        let id = registration.request().id();
        let span = RequestSpan::new(id, RequestKind::Read);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(
            async move {
                let access = inner.access.acquire_read().await;
                registration.request().transition(RequestState::Running);
                let token = registration.request().token().clone();
                let outcome = inner.run_cancellable(move || computation(&token)).await;
                drop(access);
                inner.finish(registration, outcome, tx);
            }
            .instrument(span),
        );

        RequestHandle::new(id, rx)
    }

    /// Submit a two-phase write with exclusive access.
    ///
    /// `prepare` runs first and never sees the cancellation indicator.
    /// `apply` receives its output and is cancellable and timeout-guarded.
    /// Write access is held across both phases.
    pub fn run_write<U, V, P, A>(&self, prepare: P, apply: A) -> RequestHandle<V>
    where
        P: FnOnce() -> Result<U, RequestError> + Send + 'static,
        A: FnOnce(&CancelIndicator, U) -> Result<V, RequestError> + Send + 'static,
        U: Send + 'static,
        V: Send + 'static,
    {
        // Detach before registering so the new write is not superseded itself.
        let superseded = self.inner.cancel_on_write.then(|| self.cancel_all());

        let Some((registration, tx, rx)) = self.admit(RequestKind::Write) else {
            return self.rejected();
        };
        let id = registration.request().id();
        let span = RequestSpan::new(id, RequestKind::Write);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(
            async move {
                if let Some(superseded) = superseded {
                    superseded.await;
                }
                let access = inner.access.acquire_write().await;
                registration.request().transition(RequestState::Running);
                let token = registration.request().token().clone();
                let outcome = match run_blocking(prepare).await {
                    Ok(intermediate) => {
                        inner
                            .run_cancellable(move || apply(&token, intermediate))
                            .await
                    }
                    Err(e) => Err(e),
                };
                drop(access);
                inner.finish(registration, outcome, tx);
            }
            .instrument(span),
        );

        RequestHandle::new(id, rx)
    }

    /// Cancel every request outstanding at the moment of the call and wait
    /// for all of them to terminate.
    ///
    /// Requests submitted after this call returns are unaffected. The
    /// returned future never fails.
    pub fn cancel_all(&self) -> impl Future<Output = ()> + Send + 'static {
        let cancelling = self.inner.registry.cancel_all();
        async move {
            let count = cancelling.await;
            if count > 0 {
                tracing::info!(count, "cancelled outstanding requests");
                telemetry::record_bulk_cancel(count);
            }
        }
    }

    /// Stop admitting requests, cancel and wait for outstanding ones, then
    /// stop the timeout pool. Timed-out computations still running in the
    /// pool are left to finish on their own.
    pub async fn shutdown(&self) {
        let was_running = self
            .inner
            .state
            .compare_exchange(
                ManagerState::Running as u8,
                ManagerState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !was_running {
            return;
        }

        tracing::info!("request manager draining");
        self.cancel_all().await;
        if let Some(guard) = &self.inner.timeout {
            guard.shutdown();
        }
        self.inner.state.store(ManagerState::Stopped as u8, Ordering::SeqCst);
        tracing::info!("request manager stopped");
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Number of registered (pending or running) requests.
    pub fn active_requests(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout.as_ref().map(TimeoutGuard::timeout)
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            state: self.state(),
            active_requests: self.active_requests(),
            access: self.inner.access.snapshot(),
            timeout_secs: self.timeout().map(|t| t.as_secs()),
            timeout_pool: self.inner.timeout.as_ref().map(TimeoutGuard::pool_stats),
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Create and register a request, or `None` once shutdown has begun.
    fn admit<V>(&self, kind: RequestKind) -> Option<(Registration, ResultTx<V>, ResultRx<V>)> {
        let request = Request::new(self.next_id(), kind);
        // Checked under the registry's swap lock: shutdown flips the state
        // before it detaches, so a request admitted here is always drained.
        let registration = self
            .inner
            .registry
            .register_if(request, || self.state() == ManagerState::Running)?;
        let (tx, rx) = oneshot::channel();
        telemetry::record_request_submitted(kind);
        telemetry::record_active_requests(self.inner.registry.len());
        tracing::debug!(request_id = %registration.request().id(), kind = kind.as_str(), "request submitted");
        Some((registration, tx, rx))
    }

    fn rejected<V>(&self) -> RequestHandle<V> {
        tracing::debug!("request rejected: manager is shut down");
        RequestHandle::failed(self.next_id(), RequestError::ShutDown)
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("state", &self.state())
            .field("active_requests", &self.active_requests())
            .field("timeout", &self.timeout())
            .finish()
    }
}

impl ManagerInner {
    /// Run the cancellable phase, raced against the deadline when configured.
    async fn run_cancellable<V, F>(&self, work: F) -> Result<V, RequestError>
    where
        F: FnOnce() -> Result<V, RequestError> + Send + 'static,
        V: Send + 'static,
    {
        match &self.timeout {
            Some(guard) => guard.race(work).await,
            None => run_blocking(work).await,
        }
    }

    /// Unregister, record the terminal state, then resolve the caller's handle.
    fn finish<V>(&self, registration: Registration, outcome: Result<V, RequestError>, tx: ResultTx<V>) {
        let request = Arc::clone(registration.request());
        let state = RequestState::from_outcome(&outcome);
        let latency = request.submitted_at().elapsed();

        let span = tracing::Span::current();
        span.record_outcome(&outcome);
        span.record("latency_ms", latency.as_millis() as u64);

        registration.finish(state);
        telemetry::record_request_finished(request.kind(), state, latency);
        telemetry::record_active_requests(self.registry.len());
        tracing::debug!(state = state.as_str(), "request finished");

        // The caller may have dropped its handle; the work still counted.
        let _ = tx.send(outcome);
    }
}

/// Run a computation on the blocking pool, mapping panics to faults.
async fn run_blocking<V, F>(work: F) -> Result<V, RequestError>
where
    F: FnOnce() -> Result<V, RequestError> + Send + 'static,
    V: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(RequestError::panicked(e.into_panic())),
        Err(_) => Err(RequestError::Abandoned),
    }
}

type ResultTx<V> = oneshot::Sender<Result<V, RequestError>>;
type ResultRx<V> = oneshot::Receiver<Result<V, RequestError>>;

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
