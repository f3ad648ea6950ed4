//! Request lifecycle tracking and the caller-facing result handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{oneshot, watch};

use super::cancel::CancelIndicator;
use crate::error::RequestError;

/// Unique request identifier, allocated per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestKind {
    Read,
    Write,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Request lifecycle state machine.
///
/// `Pending -> Running -> {Completed, Cancelled, Failed, TimedOut}`. A
/// pending request may also go straight to a terminal state when its
/// coordinating task is dropped before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
    TimedOut,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// Terminal state reached by a finished computation.
    pub fn from_outcome<V>(outcome: &Result<V, RequestError>) -> Self {
        match outcome {
            Ok(_) => Self::Completed,
            Err(RequestError::Cancelled) => Self::Cancelled,
            Err(RequestError::TimedOut(_)) => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }
}

/// A single unit of scheduled work.
///
/// Owns its cancellation flag. Only the coordinating task writes `state`;
/// any thread may read it or wait for it to become terminal.
pub struct Request {
    id: RequestId,
    kind: RequestKind,
    token: CancelIndicator,
    state: watch::Sender<RequestState>,
    submitted_at: Instant,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Request {
    pub fn new(id: RequestId, kind: RequestKind) -> Arc<Self> {
        let (state, _) = watch::channel(RequestState::Pending);
        Arc::new(Self {
            id,
            kind,
            token: CancelIndicator::new(),
            state,
            submitted_at: Instant::now(),
        })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Cancellation flag shared with the running computation.
    pub fn token(&self) -> &CancelIndicator {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal cancellation. The computation decides how to react.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Move to `next`. Returns false (and changes nothing) when the move
    /// would leave a terminal state or go backwards.
    pub(crate) fn transition(&self, next: RequestState) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::trace!(request_id = %self.id, state = next.as_str(), "request state changed");
        }
        moved
    }

    /// Wait until the request reaches a terminal state and return it.
    pub async fn terminated(&self) -> RequestState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            // The sender lives in `self`, so this cannot fail while we wait.
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

/// Single-assignment result of a submitted request.
///
/// Resolves exactly once with the computation's value or its failure.
#[must_use = "a request handle does nothing unless awaited"]
pub struct RequestHandle<V> {
    id: RequestId,
    rx: oneshot::Receiver<Result<V, RequestError>>,
}

impl<V> RequestHandle<V> {
    pub(crate) fn new(id: RequestId, rx: oneshot::Receiver<Result<V, RequestError>>) -> Self {
        Self { id, rx }
    }

    /// Handle that is already resolved with `err`.
    pub(crate) fn failed(id: RequestId, err: RequestError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { id, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<V> std::fmt::Debug for RequestHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}

impl<V> Future for RequestHandle<V> {
    type Output = Result<V, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_request_is_pending_and_uncancelled() {
        let request = Request::new(RequestId(1), RequestKind::Read);
        assert_eq!(request.state(), RequestState::Pending);
        assert!(!request.is_cancelled());
        assert_eq!(request.kind(), RequestKind::Read);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let request = Request::new(RequestId(1), RequestKind::Write);

        assert!(request.transition(RequestState::Running));
        assert!(!request.transition(RequestState::Pending));
        assert!(!request.transition(RequestState::Running));
        assert!(request.transition(RequestState::Completed));

        assert!(!request.transition(RequestState::Failed));
        assert!(!request.transition(RequestState::Running));
        assert_eq!(request.state(), RequestState::Completed);
    }

    #[test]
    fn test_pending_may_fail_without_running() {
        let request = Request::new(RequestId(2), RequestKind::Read);
        assert!(request.transition(RequestState::Failed));
        assert_eq!(request.state(), RequestState::Failed);
    }

    #[test]
    fn test_outcome_mapping() {
        let ok: Result<u8, RequestError> = Ok(1);
        assert_eq!(RequestState::from_outcome(&ok), RequestState::Completed);

        let cancelled: Result<u8, RequestError> = Err(RequestError::Cancelled);
        assert_eq!(RequestState::from_outcome(&cancelled), RequestState::Cancelled);

        let timed_out: Result<u8, RequestError> =
            Err(RequestError::TimedOut(Duration::from_secs(1)));
        assert_eq!(RequestState::from_outcome(&timed_out), RequestState::TimedOut);

        let failed: Result<u8, RequestError> = Err(RequestError::computation("nope"));
        assert_eq!(RequestState::from_outcome(&failed), RequestState::Failed);
    }

    #[tokio::test]
    async fn test_terminated_waits_for_terminal_state() {
        let request = Request::new(RequestId(3), RequestKind::Read);
        let waiter = {
            let request = Arc::clone(&request);
            tokio::spawn(async move { request.terminated().await })
        };

        request.transition(RequestState::Running);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        request.transition(RequestState::Cancelled);
        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, RequestState::Cancelled);
    }

    #[tokio::test]
    async fn test_handle_reports_abandoned_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<Result<u8, RequestError>>();
        let handle = RequestHandle::new(RequestId(4), rx);
        drop(tx);
        assert!(matches!(handle.await, Err(RequestError::Abandoned)));
    }

    #[tokio::test]
    async fn test_failed_handle_is_already_resolved() {
        let handle: RequestHandle<()> = RequestHandle::failed(RequestId(5), RequestError::ShutDown);
        assert_eq!(handle.id(), RequestId(5));
        assert!(matches!(handle.await, Err(RequestError::ShutDown)));
    }
}
