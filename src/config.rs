//! Request manager configuration loaded from environment variables.
//!
//! Values are read once, when the manager is constructed. Invalid values fall
//! back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REQUEST_CORE_REQUEST_TIMEOUT` | unset | Request timeout (whole secs); unset or 0 disables timeouts |
//! | `REQUEST_CORE_TIMEOUT_THREADS` | CPU count | Core threads in the dedicated timeout pool (floor 1) |
//! | `REQUEST_CORE_TIMEOUT_MAX_THREADS` | 256 | Cap on timeout pool threads while every thread is busy |
//! | `REQUEST_CORE_TIMEOUT_IDLE_MS` | 10000 | Idle time before a thread beyond the core set exits |
//! | `REQUEST_CORE_CANCEL_ON_WRITE` | false | Cancel outstanding requests when a write is submitted |

use std::time::Duration;

use crate::scheduler::ThreadPoolConfig;

pub const TIMEOUT_ENV: &str = "REQUEST_CORE_REQUEST_TIMEOUT";
pub const TIMEOUT_THREADS_ENV: &str = "REQUEST_CORE_TIMEOUT_THREADS";
pub const TIMEOUT_MAX_THREADS_ENV: &str = "REQUEST_CORE_TIMEOUT_MAX_THREADS";
pub const TIMEOUT_IDLE_ENV: &str = "REQUEST_CORE_TIMEOUT_IDLE_MS";
pub const CANCEL_ON_WRITE_ENV: &str = "REQUEST_CORE_CANCEL_ON_WRITE";

/// Configuration for [`RequestManager`](crate::scheduler::RequestManager).
#[derive(Debug, Clone)]
pub struct RequestManagerConfig {
    /// Waiting deadline for the cancellable phase. `None` runs computations
    /// without a timeout pool.
    pub timeout: Option<Duration>,
    /// Pool hosting timeout races. Unused when `timeout` is `None`.
    pub timeout_pool: ThreadPoolConfig,
    /// Submitting a write first cancels every outstanding request and waits
    /// for them to terminate.
    pub cancel_on_write: bool,
}

impl Default for RequestManagerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            timeout_pool: ThreadPoolConfig::default(),
            cancel_on_write: false,
        }
    }
}

impl RequestManagerConfig {
    /// Config with the given timeout and defaults elsewhere.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..Default::default() }
    }

    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let timeout = lookup(TIMEOUT_ENV).and_then(|raw| parse_timeout(&raw));
        let number = |key: &str| lookup(key).and_then(|raw| parse_number(key, &raw));

        let mut timeout_pool = ThreadPoolConfig::default();
        if let Some(threads) = number(TIMEOUT_THREADS_ENV) {
            timeout_pool.num_threads = (threads as usize).max(1);
        }
        if let Some(max) = number(TIMEOUT_MAX_THREADS_ENV) {
            timeout_pool.max_threads = (max as usize).max(1);
        }
        if let Some(idle_ms) = number(TIMEOUT_IDLE_ENV) {
            timeout_pool.idle_timeout_ms = idle_ms;
        }

        let cancel_on_write = lookup(CANCEL_ON_WRITE_ENV)
            .map(|raw| parse_flag(CANCEL_ON_WRITE_ENV, &raw))
            .unwrap_or(false);

        Self { timeout, timeout_pool, cancel_on_write }
    }
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            tracing::warn!(var = TIMEOUT_ENV, "zero timeout disables request timeouts");
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!(var = TIMEOUT_ENV, value = raw, "invalid timeout, timeouts disabled");
            None
        }
    }
}

fn parse_number(key: &str, raw: &str) -> Option<u64> {
    let parsed = raw.trim().parse::<u64>().ok();
    if parsed.is_none() {
        tracing::warn!(var = key, value = raw, "invalid value, using default");
    }
    parsed
}

fn parse_flag(key: &str, raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            tracing::warn!(var = key, value = raw, "invalid flag, using false");
            false
        }
    }
}
