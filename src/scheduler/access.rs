//! Reader/writer admission over the shared model.
//!
//! Many concurrent reads or exactly one write, never mixed. Once a writer
//! starts waiting, new readers are held back until it has run, so a steady
//! stream of reads cannot starve writes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct AccessState {
    active_readers: usize,
    writer_active: bool,
    waiting_writers: usize,
}

struct AccessInner {
    state: Mutex<AccessState>,
    /// Woken on every release and whenever a waiting writer gives up.
    released: Notify,
}

impl AccessInner {
    fn notify_released(&self) {
        self.released.notify_waiters();
    }
}

/// Point-in-time view of admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessSnapshot {
    pub active_readers: usize,
    pub writer_active: bool,
    pub waiting_writers: usize,
}

/// Shared/exclusive admission control.
///
/// Acquisition suspends the calling task; release happens when the returned
/// guard is dropped and never blocks. Access is not re-entrant: acquiring
/// write while holding read deadlocks.
#[derive(Clone)]
pub struct AccessCoordinator {
    inner: Arc<AccessInner>,
}

impl AccessCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AccessInner {
                state: Mutex::new(AccessState::default()),
                released: Notify::new(),
            }),
        }
    }

    /// Wait for shared access.
    pub async fn acquire_read(&self) -> ReadAccess {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not lost.
            notified.as_mut().enable();

            if let Some(access) = self.try_acquire_read() {
                return access;
            }
            notified.await;
        }
    }

    /// Take shared access if it is immediately available.
    pub fn try_acquire_read(&self) -> Option<ReadAccess> {
        let mut state = self.inner.state.lock();
        if state.writer_active || state.waiting_writers > 0 {
            return None;
        }
        state.active_readers += 1;
        Some(ReadAccess { inner: Arc::clone(&self.inner) })
    }

    /// Wait for exclusive access.
    pub async fn acquire_write(&self) -> WriteAccess {
        let mut waiting = WaitingWriter::register(&self.inner);
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if !state.writer_active && state.active_readers == 0 {
                    state.writer_active = true;
                    state.waiting_writers -= 1;
                    waiting.armed = false;
                    return WriteAccess { inner: Arc::clone(&self.inner) };
                }
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> AccessSnapshot {
        let state = self.inner.state.lock();
        AccessSnapshot {
            active_readers: state.active_readers,
            writer_active: state.writer_active,
            waiting_writers: state.waiting_writers,
        }
    }
}

impl Default for AccessCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a writer as waiting until it either acquires or is dropped.
struct WaitingWriter<'a> {
    inner: &'a AccessInner,
    armed: bool,
}

impl<'a> WaitingWriter<'a> {
    fn register(inner: &'a AccessInner) -> Self {
        inner.state.lock().waiting_writers += 1;
        Self { inner, armed: true }
    }
}

impl Drop for WaitingWriter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().waiting_writers -= 1;
            // Readers held back by this writer may proceed now.
            self.inner.notify_released();
        }
    }
}

/// RAII guard for shared access.
#[must_use = "access is released as soon as the guard is dropped"]
pub struct ReadAccess {
    inner: Arc<AccessInner>,
}

impl fmt::Debug for ReadAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadAccess").finish_non_exhaustive()
    }
}

impl Drop for ReadAccess {
    fn drop(&mut self) {
        let last = {
            let mut state = self.inner.state.lock();
            state.active_readers -= 1;
            state.active_readers == 0
        };
        if last {
            self.inner.notify_released();
        }
    }
}

/// RAII guard for exclusive access.
#[must_use = "access is released as soon as the guard is dropped"]
pub struct WriteAccess {
    inner: Arc<AccessInner>,
}

impl fmt::Debug for WriteAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteAccess").finish_non_exhaustive()
    }
}

impl Drop for WriteAccess {
    fn drop(&mut self) {
        self.inner.state.lock().writer_active = false;
        self.inner.notify_released();
    }
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
