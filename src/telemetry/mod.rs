//! Telemetry for the request scheduler.
//!
//! Structured logging via `tracing`, per-request spans, and counters through
//! the `metrics` facade. Nothing is emitted anywhere until the host installs
//! a subscriber or recorder.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_active_requests, record_bulk_cancel, record_request_finished,
    record_request_submitted, record_request_timeout,
};
pub use spans::{RequestSpan, SpanExt};
