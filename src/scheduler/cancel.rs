//! Cooperative cancellation flag handed to running computations.

use tokio_util::sync::CancellationToken;

use crate::error::RequestError;

/// Pollable cancellation signal owned by a single request.
///
/// Setting the flag never preempts anything. A computation that wants to
/// honor cancellation polls [`CancelIndicator::check`] at reasonable
/// intervals and returns early with its error.
#[derive(Clone, Default)]
pub struct CancelIndicator {
    token: CancellationToken,
}

impl CancelIndicator {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(RequestError::Cancelled)` once the flag is set.
    ///
    /// ```
    /// use request_core::scheduler::CancelIndicator;
    ///
    /// let indicator = CancelIndicator::new();
    /// assert!(indicator.check().is_ok());
    /// ```
    pub fn check(&self) -> Result<(), RequestError> {
        if self.is_cancelled() {
            Err(RequestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Set the flag. Idempotent.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for CancelIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelIndicator")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
