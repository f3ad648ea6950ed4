//! Span utilities for request tracing.

use tracing::{info_span, Span};

use crate::error::RequestError;
use crate::scheduler::{RequestId, RequestKind, RequestState};

/// Extension trait for recording request outcomes on a span.
pub trait SpanExt {
    /// Record the terminal state and, on failure, the error message.
    fn record_outcome<V>(&self, outcome: &Result<V, RequestError>);
}

impl SpanExt for Span {
    fn record_outcome<V>(&self, outcome: &Result<V, RequestError>) {
        self.record("state", RequestState::from_outcome(outcome).as_str());
        if let Err(e) = outcome {
            self.record("error.message", e.to_string().as_str());
        }
    }
}

/// Factory for creating standardized request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Create a request span.
    ///
    /// Fields included:
    /// - `request_id`: Unique identifier for the request
    /// - `kind`: `read` or `write`
    /// - `state`: To be filled in by `SpanExt::record_outcome`
    /// - `error.message`: To be filled in on failure
    /// - `latency_ms`: To be filled in after completion
    pub fn new(request_id: RequestId, kind: RequestKind) -> Span {
        info_span!(
            "request",
            request_id = request_id.0,
            kind = kind.as_str(),
            state = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
