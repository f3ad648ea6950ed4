//! Error types surfaced on request handles.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::ThreadPoolError;

/// Boxed error raised by an opaque computation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single request, as observed by the submitter.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The computation returned an error. The original error is the `source()`.
    #[error("Computation failed: {0}")]
    Computation(#[source] BoxError),

    #[error("Computation panicked: {0}")]
    Panicked(String),

    /// The waiting deadline elapsed. The computation may still be running.
    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),

    /// The computation observed its cancellation flag and stopped.
    #[error("Request was cancelled")]
    Cancelled,

    #[error("Request manager is shut down")]
    ShutDown,

    #[error("Request was abandoned before producing a result")]
    Abandoned,

    #[error("Timeout pool rejected the request: {0}")]
    Rejected(#[from] ThreadPoolError),
}

impl RequestError {
    /// Wrap an arbitrary error raised by a computation.
    pub fn computation(err: impl Into<BoxError>) -> Self {
        Self::Computation(err.into())
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
