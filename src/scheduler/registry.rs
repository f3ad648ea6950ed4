//! Outstanding-request bookkeeping for bulk cancellation.
//!
//! Every submitted request sits in the current active set until it finishes.
//! [`RequestRegistry::cancel_all`] swaps in a fresh set, so requests submitted
//! concurrently land in the new set and are left alone, then signals and
//! waits for everything it detached.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;

use super::request::{Request, RequestId, RequestState};

type ActiveSet = DashMap<RequestId, Arc<Request>>;

/// Concurrent registry of live requests.
pub struct RequestRegistry {
    active: Mutex<Arc<ActiveSet>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self { active: Mutex::new(Arc::new(DashMap::new())) }
    }

    /// Insert into the current active set if `admit` holds.
    ///
    /// `admit` runs under the swap lock, so a flag flipped before a `detach`
    /// is seen by every later registration and every earlier one lands in
    /// the detached set. The returned registration removes the request from
    /// that same set when it is finished or dropped, exactly once.
    pub fn register_if(
        &self,
        request: Arc<Request>,
        admit: impl FnOnce() -> bool,
    ) -> Option<Registration> {
        let active = self.active.lock();
        admit().then(|| Self::insert(&active, request))
    }

    fn insert(active: &Arc<ActiveSet>, request: Arc<Request>) -> Registration {
        active.insert(request.id(), Arc::clone(&request));
        Registration {
            set: Arc::clone(active),
            request,
            outcome: RequestState::Failed,
        }
    }

    /// Swap in an empty active set and return what was in the old one.
    pub fn detach(&self) -> Vec<Arc<Request>> {
        let old = std::mem::replace(&mut *self.active.lock(), Arc::new(DashMap::new()));
        old.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Detach all live requests, set their cancellation flags, and return a
    /// future that resolves with the count once every one is terminal.
    ///
    /// Signaling happens before this returns; only the waiting is deferred.
    pub fn cancel_all(&self) -> impl Future<Output = usize> + Send + 'static {
        let detached = self.detach();
        for request in &detached {
            request.cancel();
        }
        async move {
            join_all(detached.iter().map(|r| r.terminated())).await;
            detached.len()
        }
    }

    /// Number of requests in the current active set.
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.active.lock().contains_key(&id)
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership of one request in an active set.
///
/// On drop the request leaves the set it was inserted into and then moves
/// to its recorded terminal state (`Failed` unless [`Registration::finish`]
/// set another one).
pub struct Registration {
    set: Arc<ActiveSet>,
    request: Arc<Request>,
    outcome: RequestState,
}

impl Registration {
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Unregister and record the terminal state.
    pub fn finish(mut self, state: RequestState) {
        debug_assert!(state.is_terminal());
        self.outcome = state;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.set.remove(&self.request.id());
        self.request.transition(self.outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::request::RequestKind;
    use std::time::Duration;

    fn request(id: u64) -> Arc<Request> {
        Request::new(RequestId(id), RequestKind::Read)
    }

    #[test]
    fn test_register_and_finish_leaves_no_entry() {
        let registry = RequestRegistry::new();
        let r = request(1);

        let registration = registry.register_if(r.clone(), || true).unwrap();
        assert!(registry.contains(RequestId(1)));
        assert_eq!(registry.len(), 1);

        registration.finish(RequestState::Completed);
        assert!(registry.is_empty());
        assert_eq!(r.state(), RequestState::Completed);
    }

    #[test]
    fn test_dropped_registration_fails_request() {
        let registry = RequestRegistry::new();
        let r = request(1);

        drop(registry.register_if(r.clone(), || true).unwrap());
        assert!(registry.is_empty());
        assert_eq!(r.state(), RequestState::Failed);
    }

    #[test]
    fn test_detach_swaps_in_fresh_set() {
        let registry = RequestRegistry::new();
        let first = registry.register_if(request(1), || true).unwrap();
        let second = registry.register_if(request(2), || true).unwrap();

        let detached = registry.detach();
        assert_eq!(detached.len(), 2);
        assert!(registry.is_empty());

        // Requests registered after the swap go into the new set.
        let third = registry.register_if(request(3), || true).unwrap();
        assert!(registry.contains(RequestId(3)));

        // Finishing a detached request does not disturb the new set.
        first.finish(RequestState::Completed);
        second.finish(RequestState::Cancelled);
        assert_eq!(registry.len(), 1);
        third.finish(RequestState::Completed);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_if_rejects_without_inserting() {
        let registry = RequestRegistry::new();
        assert!(registry.register_if(request(1), || false).is_none());
        assert!(registry.is_empty());

        let admitted = registry.register_if(request(2), || true).unwrap();
        assert!(registry.contains(RequestId(2)));
        admitted.finish(RequestState::Completed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_signals_and_waits() {
        let registry = RequestRegistry::new();
        let r1 = request(1);
        let r2 = request(2);
        let reg1 = registry.register_if(r1.clone(), || true).unwrap();
        let reg2 = registry.register_if(r2.clone(), || true).unwrap();

        let cancelling = tokio::spawn(registry.cancel_all());
        assert!(r1.is_cancelled());
        assert!(r2.is_cancelled());

        let late = request(3);
        let reg3 = registry.register_if(late.clone(), || true).unwrap();
        assert!(!late.is_cancelled());

        reg1.request().transition(RequestState::Running);
        reg1.finish(RequestState::Cancelled);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cancelling.is_finished());

        reg2.finish(RequestState::Completed);
        let count = tokio::time::timeout(Duration::from_secs(1), cancelling)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 2);
        assert!(!late.is_cancelled());
        assert_eq!(registry.len(), 1);
        reg3.finish(RequestState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_all_on_empty_registry_resolves_immediately() {
        let registry = RequestRegistry::new();
        assert_eq!(registry.cancel_all().await, 0);
    }
}
