//! Request metrics through the `metrics` facade.

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::scheduler::{RequestKind, RequestState};

const SUBMITTED: &str = "request_core_requests_submitted_total";
const FINISHED: &str = "request_core_requests_finished_total";
const TIMEOUTS: &str = "request_core_request_timeouts_total";
const BULK_CANCELLED: &str = "request_core_bulk_cancelled_total";
const ACTIVE: &str = "request_core_active_requests";
const LATENCY: &str = "request_core_request_latency_seconds";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(SUBMITTED, "Requests submitted, by kind");
    describe_counter!(FINISHED, "Requests that reached a terminal state, by kind and state");
    describe_counter!(TIMEOUTS, "Requests whose waiting deadline elapsed");
    describe_counter!(BULK_CANCELLED, "Requests detached and signalled by cancel_all");
    describe_gauge!(ACTIVE, "Requests currently registered as outstanding");
    describe_histogram!(LATENCY, "Time from submission to terminal state");
}

pub fn record_request_submitted(kind: RequestKind) {
    counter!(SUBMITTED, "kind" => kind.as_str()).increment(1);
}

pub fn record_request_finished(kind: RequestKind, state: RequestState, latency: Duration) {
    counter!(FINISHED, "kind" => kind.as_str(), "state" => state.as_str()).increment(1);
    histogram!(LATENCY, "kind" => kind.as_str()).record(latency.as_secs_f64());
}

pub fn record_request_timeout() {
    counter!(TIMEOUTS).increment(1);
}

pub fn record_bulk_cancel(count: usize) {
    counter!(BULK_CANCELLED).increment(count as u64);
}

pub fn record_active_requests(count: usize) {
    gauge!(ACTIVE).set(count as f64);
}
