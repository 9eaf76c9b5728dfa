//! Capacity-aware worker pool split into a reserved stat lane and a normal lane.
//!
//! The pool owns `stat_threads + normal_threads` OS threads. Capacity is
//! accounted in slots:
//!
//! - stat work may use any free slot, including slots nominally meant for
//!   normal work
//! - normal work may never use a slot that is currently reserved for stat
//!   work, even when that slot is idle
//!
//! Completion of any job releases its slot and raises the scheduler's
//! [`WakeSignal`] so the next cycle runs without waiting out the poll interval.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_work_queue::core::{Lane, PoolConfig, WakeSignal, WorkerPool};
//!
//! let wake = Arc::new(WakeSignal::new());
//! let pool = WorkerPool::new(PoolConfig::new(1, 4), Arc::clone(&wake))?;
//! if pool.normal_available() > 0 {
//!     pool.enqueue(&job, Lane::Normal, processor, Box::pin(async move { /* run it */ }))?;
//! }
//! ```

mod native;

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::job::Priority;

pub use native::WorkerPool;

/// Sizing of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots reserved for stat-priority work.
    pub stat_threads: usize,
    /// Slots for everything else.
    pub normal_threads: usize,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl PoolConfig {
    /// Pool with the given lane sizes and default stack size.
    #[must_use]
    pub fn new(stat_threads: usize, normal_threads: usize) -> Self {
        Self {
            stat_threads,
            normal_threads,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name: "work-queue".into(),
        }
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Total number of slots.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.stat_threads + self.normal_threads
    }

    /// Check the sizing.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.concurrency() == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err(SchedulerError::InvalidConfig(
                "thread_stack_size must be at least 64 KiB".into(),
            ));
        }
        Ok(())
    }
}

/// Capacity lane a dispatched job is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// May take any free slot and holds the stat reservation while it runs.
    Stat,
    /// Leaves the unused stat reservation alone.
    Normal,
}

impl Lane {
    /// Lane for admitted work of `priority`.
    #[must_use]
    pub const fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Stat => Self::Stat,
            Priority::High | Priority::Normal => Self::Normal,
        }
    }
}

/// Slot bookkeeping shared between the dispatcher and the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounters {
    /// Jobs handed to the pool but not yet picked up by a worker.
    pub queued: usize,
    /// Jobs a worker is executing.
    pub active: usize,
    /// Queued or active jobs in the stat lane.
    pub stat_in_use: usize,
}

impl SlotCounters {
    /// Free slots for stat work: everything not queued or active.
    #[must_use]
    pub const fn stat_available(&self, concurrency: usize) -> usize {
        concurrency.saturating_sub(self.queued + self.active)
    }

    /// Free slots for normal work, excluding the unused part of the stat reservation.
    #[must_use]
    pub const fn normal_available(&self, concurrency: usize, stat_threads: usize) -> usize {
        let reserved = stat_threads.saturating_sub(self.stat_in_use);
        self.stat_available(concurrency).saturating_sub(reserved)
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Slots reserved for stat work.
    pub stat_threads: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs executing.
    pub active: usize,
    /// Stat-lane jobs queued or executing.
    pub stat_in_use: usize,
    /// Jobs accepted since start.
    pub submitted: u64,
    /// Jobs finished since start.
    pub completed: u64,
    /// Jobs whose execution panicked.
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct WakeState {
    signaled: bool,
    shutdown: bool,
}

/// Resettable wake-up signal for the scheduling loop.
///
/// A signal raised while nobody waits is remembered until the next wait.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<WakeState>,
    condvar: Condvar,
}

impl WakeSignal {
    /// Unsignaled wake handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter early.
    pub fn signal(&self) {
        self.state.lock().signaled = true;
        self.condvar.notify_one();
    }

    /// Ask the waiter to stop.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Block until signaled, shut down or `timeout` elapses, then reset the
    /// signal. Returns `false` once shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.signaled && !state.shutdown {
            let _ = self
                .condvar
                .wait_while_for(&mut state, |s| !s.signaled && !s.shutdown, timeout);
        }
        state.signaled = false;
        !state.shutdown
    }
}
