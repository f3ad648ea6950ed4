//! Request scheduling core for stateful services.
//!
//! Answers many overlapping queries and mutations against one shared
//! in-memory model, such as a language server's workspace. The core schedules
//! *access* to the model; it never looks at what a request computes.
//!
//! # Guarantees
//!
//! - **Exclusion**: any number of reads at once, or exactly one write
//! - **Cooperative cancellation**: computations poll a [`CancelIndicator`]
//! - **Timeouts**: an optional deadline stops the wait, not the work
//! - **No leaks**: finished requests always leave the registry
//!
//! # Example
//!
//! ```no_run
//! use request_core::{RequestManager, RequestManagerConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RequestManager::new(RequestManagerConfig::default())?;
//!
//! let symbols = manager.run_read(|cancel| {
//!     cancel.check()?;
//!     Ok(vec!["main", "helper"])
//! });
//! assert_eq!(symbols.await?.len(), 2);
//!
//! manager.cancel_all().await;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`CancelIndicator`]: scheduler::CancelIndicator

pub mod config;
pub mod error;
pub mod scheduler;
pub mod telemetry;

pub use config::RequestManagerConfig;
pub use error::{BoxError, RequestError};
pub use scheduler::{CancelIndicator, RequestHandle, RequestId, RequestManager};
