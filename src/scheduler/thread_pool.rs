//! Thread pool hosting timeout races.
//!
//! Kept separate from the blocking pool that runs ordinary computations. A
//! core set of threads (one per CPU by default) lives as long as the pool;
//! when every thread is busy, extra threads are started up to `max_threads`
//! and retire after `idle_timeout_ms` without work. A computation that
//! outlives its deadline therefore never holds up work admitted after it.
//! Threads are detached: shutting the pool down never waits for a runaway
//! computation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Configuration for the thread pool.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Threads kept alive for the lifetime of the pool (floor 1).
    pub num_threads: usize,
    /// Upper bound on live threads, core threads included.
    pub max_threads: usize,
    /// Maximum queued tasks waiting for a free thread.
    pub queue_size: usize,
    /// Thread name prefix; threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
    /// Idle time after which a thread beyond the core set exits (milliseconds).
    pub idle_timeout_ms: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get().max(1),
            max_threads: 256,
            queue_size: 1024,
            thread_name_prefix: "request-timeout".to_string(),
            idle_timeout_ms: 10_000,
        }
    }
}

impl ThreadPoolConfig {
    /// Create config with specific core thread count.
    pub fn with_threads(count: usize) -> Self {
        Self {
            num_threads: count.max(1),
            ..Default::default()
        }
    }
}

/// A task to be executed by the thread pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Statistics for thread pool performance.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ThreadPoolStats {
    pub total_tasks_executed: u64,
    pub queue_overflows: u64,
    pub avg_exec_time_us: u64,
    pub queued: usize,
    /// Live threads, core and extra.
    pub threads: usize,
    /// Threads currently running a task.
    pub threads_active: usize,
}

#[derive(Default)]
struct PoolState {
    tasks: VecDeque<Task>,
    threads: usize,
    idle: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
    next_thread: AtomicUsize,
    stats: Mutex<ThreadPoolStats>,
    core_threads: usize,
    max_threads: usize,
    queue_size: usize,
    thread_name_prefix: String,
    idle_timeout: Duration,
}

/// FIFO thread pool with a bounded queue and on-demand growth.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Create a new thread pool and start its core threads.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        let core_threads = config.num_threads.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            next_thread: AtomicUsize::new(0),
            stats: Mutex::new(ThreadPoolStats::default()),
            core_threads,
            max_threads: config.max_threads.max(core_threads),
            queue_size: config.queue_size,
            thread_name_prefix: config.thread_name_prefix,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms.max(1)),
        });

        {
            let mut state = shared.state.lock();
            for _ in 0..core_threads {
                if let Err(e) = spawn_worker(&shared, &mut state) {
                    // Stop whatever already started before bailing out.
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.available.notify_all();
                    return Err(ThreadPoolError::ThreadSpawnFailed(e.to_string()));
                }
            }
        }

        tracing::debug!(
            threads = core_threads,
            max_threads = shared.max_threads,
            prefix = %shared.thread_name_prefix,
            "thread pool started"
        );

        Ok(Self { shared })
    }

    /// Queue a task for execution, starting an extra thread when none is free.
    pub fn submit(&self, task: Task) -> Result<(), ThreadPoolError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(ThreadPoolError::PoolShutdown);
        }

        {
            let mut state = self.shared.state.lock();
            if state.tasks.len() >= self.shared.queue_size {
                self.shared.stats.lock().queue_overflows += 1;
                return Err(ThreadPoolError::QueueFull);
            }
            state.tasks.push_back(task);

            // More queued tasks than idle threads to take them.
            if state.tasks.len() > state.idle && state.threads < self.shared.max_threads {
                if let Err(e) = spawn_worker(&self.shared, &mut state) {
                    tracing::warn!(error = %e, "failed to grow thread pool, task stays queued");
                }
            }
        }

        self.shared.available.notify_one();
        Ok(())
    }

    /// Get current statistics.
    pub fn stats(&self) -> ThreadPoolStats {
        let mut stats = self.shared.stats.lock().clone();
        let state = self.shared.state.lock();
        stats.queued = state.tasks.len();
        stats.threads = state.threads;
        stats.threads_active = self.shared.active.load(Ordering::SeqCst);
        stats
    }

    /// Signal shutdown without waiting for threads. Queued tasks are dropped
    /// unrun; running tasks finish on their own.
    pub fn signal_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let dropped = std::mem::take(&mut self.shared.state.lock().tasks);
        self.shared.available.notify_all();
        drop(dropped);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Detach: a timed-out computation may still be running.
        self.signal_shutdown();
    }
}

fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState) -> std::io::Result<()> {
    let id = shared.next_thread.fetch_add(1, Ordering::Relaxed);
    let worker = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{}-{}", shared.thread_name_prefix, id))
        .spawn(move || worker_loop(&worker))?;
    state.threads += 1;
    Ok(())
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    state.threads -= 1;
                    return;
                }
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }

                state.idle += 1;
                let waited = shared.available.wait_for(&mut state, shared.idle_timeout);
                state.idle -= 1;

                if waited.timed_out()
                    && state.tasks.is_empty()
                    && state.threads > shared.core_threads
                {
                    state.threads -= 1;
                    return;
                }
            }
        };

        shared.active.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
            tracing::warn!("thread pool task panicked");
        }
        let exec_us = start.elapsed().as_micros() as u64;
        shared.active.fetch_sub(1, Ordering::SeqCst);

        let mut stats = shared.stats.lock();
        stats.total_tasks_executed += 1;
        // Rolling average of execution time
        if stats.avg_exec_time_us == 0 {
            stats.avg_exec_time_us = exec_us;
        } else {
            stats.avg_exec_time_us = (stats.avg_exec_time_us * 9 + exec_us) / 10;
        }
    }
}

/// Errors for thread pool operations.
#[derive(Debug, thiserror::Error)]
pub enum ThreadPoolError {
    #[error("Thread pool is shut down")]
    PoolShutdown,

    #[error("Task queue is full")]
    QueueFull,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawnFailed(String),
}
