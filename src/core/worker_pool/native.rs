//! OS-thread implementation of the worker pool.
//!
//! Every worker thread owns a single-threaded tokio runtime and blocks on the
//! task channel between jobs. Dropping the sender is the shutdown signal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{Lane, PoolConfig, PoolStats, SlotCounters, WakeSignal};
use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobId};
use crate::core::processor::Processor;

/// Work handed to a worker thread.
struct PoolTask {
    job_id: JobId,
    stat: bool,
    run: Pin<Box<dyn Future<Output = ()> + Send>>,
}

/// State shared by the pool handle and its workers.
struct Shared {
    config: PoolConfig,
    slots: Mutex<SlotCounters>,
    running: Mutex<HashMap<JobId, Arc<dyn Processor>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    wake: Arc<WakeSignal>,
}

impl Shared {
    fn finish(&self, task_id: JobId, stat: bool) {
        {
            let mut slots = self.slots.lock();
            slots.active = slots.active.saturating_sub(1);
            if stat {
                slots.stat_in_use = slots.stat_in_use.saturating_sub(1);
            }
        }
        self.running.lock().remove(&task_id);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.wake.signal();
    }
}

/// Fixed-size pool of worker threads with stat-lane reservation.
pub struct WorkerPool {
    shared: Arc<Shared>,
    task_tx: Mutex<Option<Sender<PoolTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl WorkerPool {
    /// Spawn `config.concurrency()` workers. Completions raise `wake`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if the sizing is invalid.
    pub fn new(config: PoolConfig, wake: Arc<WakeSignal>) -> Result<Self, SchedulerError> {
        config.validate()?;
        let concurrency = config.concurrency();
        let (task_tx, task_rx) = bounded::<PoolTask>(concurrency * 4);

        let shared = Arc::new(Shared {
            config,
            slots: Mutex::new(SlotCounters::default()),
            running: Mutex::new(HashMap::new()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            wake,
        });

        let workers = (0..concurrency)
            .map(|worker_id| spawn_worker(worker_id, task_rx.clone(), Arc::clone(&shared)))
            .collect();

        info!(
            stat_threads = shared.config.stat_threads,
            normal_threads = shared.config.normal_threads,
            "worker pool started"
        );

        Ok(Self {
            shared,
            task_tx: Mutex::new(Some(task_tx)),
            workers: Mutex::new(workers),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Total number of slots.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.shared.config.concurrency()
    }

    /// Free slots usable by stat-priority work.
    #[must_use]
    pub fn stat_available(&self) -> usize {
        self.shared.slots.lock().stat_available(self.concurrency())
    }

    /// Free slots usable by high- and normal-priority work.
    #[must_use]
    pub fn normal_available(&self) -> usize {
        self.shared
            .slots
            .lock()
            .normal_available(self.concurrency(), self.shared.config.stat_threads)
    }

    /// Hand `job` to a worker, counted against `lane`. `run` performs the
    /// whole execution, including status reporting; `processor` is kept so the
    /// job can be canceled.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::PoolShutdown`] after [`shutdown`](Self::shutdown)
    /// - [`SchedulerError::QueueFull`] if the hand-off queue is saturated
    pub fn enqueue(
        &self,
        job: &Job,
        lane: Lane,
        processor: Arc<dyn Processor>,
        run: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolShutdown);
        }
        let stat = lane == Lane::Stat;
        let task = PoolTask {
            job_id: job.id,
            stat,
            run,
        };

        let task_tx = self.task_tx.lock();
        let Some(task_tx) = task_tx.as_ref() else {
            return Err(SchedulerError::PoolShutdown);
        };

        // Account before sending so a fast worker never sees queued == 0.
        {
            let mut slots = self.shared.slots.lock();
            slots.queued += 1;
            if stat {
                slots.stat_in_use += 1;
            }
        }
        self.shared.running.lock().insert(job.id, processor);

        match task_tx.try_send(task) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(job_id = %job.id, kind = %job.kind, lane = ?lane, "job enqueued");
                Ok(())
            }
            Err(e) => {
                {
                    let mut slots = self.shared.slots.lock();
                    slots.queued = slots.queued.saturating_sub(1);
                    if stat {
                        slots.stat_in_use = slots.stat_in_use.saturating_sub(1);
                    }
                }
                self.shared.running.lock().remove(&job.id);
                match e {
                    TrySendError::Full(_) => {
                        warn!(job_id = %job.id, "worker pool queue is full");
                        Err(SchedulerError::QueueFull)
                    }
                    TrySendError::Disconnected(_) => Err(SchedulerError::PoolShutdown),
                }
            }
        }
    }

    /// Forward a cancel request to the processor of a queued or running job.
    /// Returns `false` if the pool does not hold the job.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let processor = self.shared.running.lock().get(&job_id).cloned();
        processor.is_some_and(|processor| {
            debug!(job_id = %job_id, "forwarding cancel to processor");
            processor.cancel();
            true
        })
    }

    /// Whether the pool holds `job_id`.
    #[must_use]
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.shared.running.lock().contains_key(&job_id)
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let slots = *self.shared.slots.lock();
        PoolStats {
            worker_count: self.concurrency(),
            stat_threads: self.shared.config.stat_threads,
            queued: slots.queued,
            active: slots.active,
            stat_in_use: slots.stat_in_use,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and join the workers once they finish their
    /// current job. Workers that do not exit within `grace` are detached.
    pub fn shutdown(&self, grace: Duration) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down worker pool");
        *self.task_tx.lock() = None;

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = workers.len();
        for (idx, worker) in workers.into_iter().enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(grace) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit in time, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_count, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Detach rather than join so a stuck processor cannot hang the host.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.task_tx.lock() = None;
            debug!("worker pool dropped without shutdown, detaching workers");
        }
    }
}

fn spawn_worker(worker_id: usize, task_rx: Receiver<PoolTask>, shared: Arc<Shared>) -> JoinHandle<()> {
    let name = format!("{}-{worker_id}", shared.config.thread_name);
    thread::Builder::new()
        .name(name)
        .stack_size(shared.config.thread_stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            while let Ok(task) = task_rx.recv() {
                {
                    let mut slots = shared.slots.lock();
                    slots.queued = slots.queued.saturating_sub(1);
                    slots.active += 1;
                }

                let PoolTask { job_id, stat, run } = task;
                let outcome = rt.block_on(async move { tokio::spawn(run).await });
                if let Err(e) = outcome {
                    shared.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id, job_id = %job_id, error = %e, "job execution aborted");
                }
                shared.finish(job_id, stat);
            }
            debug!(worker_id, "worker channel closed, exiting");
        })
        .expect("failed to spawn worker thread")
}
