//! Request scheduling for shared in-memory state.
//!
//! Reads run concurrently, writes run alone, every computation gets a
//! cooperative cancellation indicator, and an optional deadline bounds how
//! long a caller waits. Outstanding requests are tracked so they can be
//! cancelled in bulk when the state they were computed against goes stale.

mod access;
mod cancel;
mod manager;
mod registry;
mod request;
mod thread_pool;
mod timeout;

pub use access::{AccessCoordinator, AccessSnapshot, ReadAccess, WriteAccess};
pub use cancel::CancelIndicator;
pub use manager::{ManagerSnapshot, ManagerState, RequestManager};
pub use registry::{Registration, RequestRegistry};
pub use request::{Request, RequestHandle, RequestId, RequestKind, RequestState};
pub use thread_pool::{Task, ThreadPool, ThreadPoolConfig, ThreadPoolError, ThreadPoolStats};
pub use timeout::TimeoutGuard;
