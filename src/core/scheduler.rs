//! Scheduling loop: crash recovery, admission passes, dispatch and the
//! worker-side execution of a job.
//!
//! Each cycle first lets the deletion sweep use up to half of the free normal
//! slots, then asks for admissible jobs lane by lane (stat, high, normal) and
//! hands them to the worker pool. When nothing was dispatched the loop blocks
//! on the pool's [`WakeSignal`] for at most the poll interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::core::admission::{Admission, AdmissionSnapshot};
use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobId, JobStatus, Priority};
use crate::core::processor::{FailureType, Processor, ProcessorRegistry};
use crate::core::status_proxy::{StatusContext, StatusProxy};
use crate::core::store::{JobFilter, JobSession};
use crate::core::worker_pool::{Lane, PoolConfig, PoolStats, WakeSignal, WorkerPool};

/// Candidates fetched per admission slot.
const CANDIDATE_FACTOR: usize = 4;

/// Loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Longest wait between cycles when there is nothing to do.
    pub poll_interval: StdDuration,
    /// Maximum running jobs per kind.
    pub kind_limits: HashMap<String, usize>,
    /// How long shutdown waits for each worker.
    pub shutdown_grace: StdDuration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_millis(2500),
            kind_limits: HashMap::new(),
            shutdown_grace: StdDuration::from_secs(2),
        }
    }
}

/// Result of one admission pass over a priority lane.
#[derive(Debug, Default, Clone)]
pub struct AdmissionPass {
    /// Jobs moved to `InProgress`.
    pub admitted: Vec<Job>,
    /// Jobs that found a conflict and were moved to `Idle`.
    pub postponed: Vec<Job>,
}

/// Admit up to `count` jobs of `priority` within `session`.
///
/// Up to four times `count` eligible candidates are examined in process-time
/// order. Candidates that must wait are postponed in the same session. The
/// caller commits.
pub fn admit_batch(
    session: &mut dyn JobSession,
    priority: Priority,
    count: usize,
    now: DateTime<Utc>,
    postpone: Duration,
    kind_limits: &HashMap<String, usize>,
) -> Result<AdmissionPass, SchedulerError> {
    let mut pass = AdmissionPass::default();
    if count == 0 {
        return Ok(pass);
    }
    let candidates = session.fetch_eligible(priority, count.saturating_mul(CANDIDATE_FACTOR), now)?;
    if candidates.is_empty() {
        return Ok(pass);
    }

    let mut snapshot = AdmissionSnapshot::new(now, session.fetch(&JobFilter::active())?)
        .with_kind_limits(kind_limits.clone());

    for mut job in candidates {
        if pass.admitted.len() >= count {
            break;
        }
        match snapshot.can_start(&job) {
            Admission::Start => {
                job.status = JobStatus::InProgress;
                session.update(&job)?;
                snapshot.mark_started(&job);
                pass.admitted.push(job);
            }
            Admission::Wait(reason) => {
                debug!(
                    job_id = %job.id,
                    kind = %job.kind,
                    blocker = %reason.blocker,
                    "postponing job: {}",
                    reason.message
                );
                job.status = JobStatus::Idle;
                job.progress.status_details = reason.message;
                job.postpone(now, postpone);
                session.update(&job)?;
                pass.postponed.push(job);
            }
        }
    }
    Ok(pass)
}

/// Counts of records repaired by [`Scheduler::reset_interrupted_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `InProgress` jobs returned to `Pending`.
    pub restarted: usize,
    /// `DeleteInProgress` jobs returned to `Deleted`.
    pub deletions_reset: usize,
    /// `Canceling` jobs finalized to `Canceled`.
    pub cancellations_finalized: usize,
}

/// The scheduling loop and the worker pool it feeds.
pub struct Scheduler {
    ctx: StatusContext,
    registry: ProcessorRegistry,
    pool: WorkerPool,
    wake: Arc<WakeSignal>,
    settings: SchedulerSettings,
    stop_requested: AtomicBool,
}

impl Scheduler {
    /// Build the scheduler and start its worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] for an unusable pool size.
    pub fn new(
        ctx: StatusContext,
        registry: ProcessorRegistry,
        pool_config: PoolConfig,
        settings: SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        let wake = Arc::new(WakeSignal::new());
        let pool = WorkerPool::new(pool_config, Arc::clone(&wake))?;
        Ok(Self {
            ctx,
            registry,
            pool,
            wake,
            settings,
            stop_requested: AtomicBool::new(false),
        })
    }

    /// Shared collaborators.
    #[must_use]
    pub const fn context(&self) -> &StatusContext {
        &self.ctx
    }

    /// Worker pool statistics.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Free stat-lane slots.
    #[must_use]
    pub fn stat_available(&self) -> usize {
        self.pool.stat_available()
    }

    /// Free normal-lane slots.
    #[must_use]
    pub fn normal_available(&self) -> usize {
        self.pool.normal_available()
    }

    /// Wake the loop before its poll interval elapses.
    pub fn signal(&self) {
        self.wake.signal();
    }

    /// Ask [`run`](Self::run) to return after its current cycle.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.shutdown();
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Forward a cancel request to the processor running `id`.
    pub fn cancel(&self, id: JobId) -> bool {
        self.pool.cancel(id)
    }

    /// Stop the pool, waiting for running jobs within the configured grace.
    pub fn shutdown_pool(&self) {
        self.pool.shutdown(self.settings.shutdown_grace);
    }

    /// Repair records left behind by a crash. Safe to run repeatedly.
    pub fn reset_interrupted_jobs(&self) -> Result<RecoveryReport, SchedulerError> {
        let now = self.ctx.now();
        let delete_delay = self.ctx.timings.delete_delay;
        let mut report = RecoveryReport::default();
        let mut changed = Vec::new();

        let mut session = self.ctx.store.begin()?;
        for mut job in session.fetch(&JobFilter::any())? {
            match job.status {
                JobStatus::InProgress => {
                    job.status = JobStatus::Pending;
                    report.restarted += 1;
                }
                JobStatus::DeleteInProgress => {
                    job.status = JobStatus::Deleted;
                    report.deletions_reset += 1;
                }
                JobStatus::Canceling => {
                    job.status = JobStatus::Canceled;
                    job.delete_time = now + delete_delay;
                    report.cancellations_finalized += 1;
                }
                _ => continue,
            }
            session.update(&job)?;
            changed.push(job);
        }
        session.commit()?;

        for job in &changed {
            self.ctx.publisher.updated(job, now);
        }
        info!(
            restarted = report.restarted,
            deletions_reset = report.deletions_reset,
            cancellations_finalized = report.cancellations_finalized,
            "reset interrupted jobs"
        );
        Ok(report)
    }

    /// Run recovery, then cycle until [`request_stop`](Self::request_stop).
    ///
    /// # Errors
    ///
    /// Fails only if recovery cannot read or write the store. Errors inside a
    /// cycle are logged and the cycle is retried after the poll interval.
    pub fn run(&self) -> Result<(), SchedulerError> {
        self.reset_interrupted_jobs()?;
        info!(
            concurrency = self.pool.concurrency(),
            poll_interval_ms = self.settings.poll_interval.as_millis(),
            "scheduler running"
        );

        while !self.stop_requested() {
            let dispatched = match self.run_once() {
                Ok(dispatched) => dispatched,
                Err(e) => {
                    warn!(error = %e, "scheduling cycle failed");
                    false
                }
            };
            if !dispatched && !self.wake.wait_timeout(self.settings.poll_interval) {
                break;
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    /// One cycle: deletion sweep, admission and dispatch. Returns whether any
    /// admitted job was dispatched.
    pub fn run_once(&self) -> Result<bool, SchedulerError> {
        let normal = self.pool.normal_available();
        if normal > 1 {
            let deletions = self.fetch_deletions(normal / 2)?;
            if !deletions.is_empty() {
                self.dispatch(deletions);
            }
        }

        match self.fetch_jobs(self.pool.stat_available(), self.pool.normal_available())? {
            Some(jobs) if !jobs.is_empty() => {
                self.dispatch(jobs);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                debug!("no worker slots available");
                Ok(false)
            }
        }
    }

    /// Admit jobs lane by lane: stat first, then high, then normal. Returns
    /// `None` when neither lane has a free slot.
    pub fn fetch_jobs(
        &self,
        stat_available: usize,
        normal_available: usize,
    ) -> Result<Option<Vec<Job>>, SchedulerError> {
        if stat_available == 0 && normal_available == 0 {
            return Ok(None);
        }
        let mut jobs = Vec::new();
        if stat_available > 0 {
            jobs = self.admit(Priority::Stat, stat_available)?;
        }
        if jobs.is_empty() && normal_available > 0 {
            jobs = self.admit(Priority::High, normal_available)?;
        }
        if jobs.is_empty() && normal_available > 0 {
            jobs = self.admit(Priority::Normal, normal_available)?;
        }
        Ok(Some(jobs))
    }

    fn admit(&self, priority: Priority, count: usize) -> Result<Vec<Job>, SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let pass = admit_batch(
            session.as_mut(),
            priority,
            count,
            now,
            self.ctx.timings.postpone,
            &self.settings.kind_limits,
        )?;
        session.commit()?;

        for job in pass.postponed.iter().chain(&pass.admitted) {
            self.ctx.publisher.updated(job, now);
        }
        if !pass.admitted.is_empty() || !pass.postponed.is_empty() {
            debug!(
                priority = %priority,
                admitted = pass.admitted.len(),
                postponed = pass.postponed.len(),
                "admission pass"
            );
        }
        Ok(pass.admitted)
    }

    /// Claim up to `count` records for the deletion sweep, flipping them to
    /// `DeleteInProgress`.
    pub fn fetch_deletions(&self, count: usize) -> Result<Vec<Job>, SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut jobs = session.fetch_for_deletion(count, now)?;
        for job in &mut jobs {
            job.status = JobStatus::DeleteInProgress;
            session.update(job)?;
        }
        session.commit()?;

        for job in &jobs {
            self.ctx.publisher.updated(job, now);
        }
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "claimed jobs for deletion");
        }
        Ok(jobs)
    }

    /// Hand admitted or claimed jobs to the worker pool.
    pub fn dispatch(&self, jobs: Vec<Job>) {
        for job in jobs {
            let deleting = job.status == JobStatus::DeleteInProgress;
            let Some(processor) = self.registry.create(&job.kind) else {
                self.reject_unprocessable(job, deleting);
                continue;
            };

            // The deletion sweep is sized from the normal lane.
            let lane = if deleting {
                Lane::Normal
            } else {
                Lane::for_priority(job.priority)
            };
            let run = Box::pin(execute(self.ctx.clone(), Arc::clone(&processor), job.clone()));
            if let Err(e) = self.pool.enqueue(&job, lane, processor, run) {
                warn!(job_id = %job.id, error = %e, "could not enqueue job, releasing it");
                if let Err(e) = self.release(&job) {
                    error!(job_id = %job.id, error = %e, "failed to release job");
                }
            }
        }
    }

    fn reject_unprocessable(&self, job: Job, deleting: bool) {
        let proxy = StatusProxy::new(self.ctx.clone(), job);
        let job = proxy.job();
        let result = if deleting {
            warn!(job_id = %job.id, kind = %job.kind, "no processor for kind, deleting directly");
            proxy.delete()
        } else {
            error!(job_id = %job.id, kind = %job.kind, "no processor registered, failing job");
            let reason = SchedulerError::NoProcessor(job.kind.clone()).to_string();
            proxy.fail(&reason, FailureType::Fatal)
        };
        if let Err(e) = result {
            error!(job_id = %job.id, error = %e, "failed to finalize unprocessable job");
        }
    }

    /// Undo a claim that never reached a worker.
    fn release(&self, job: &Job) -> Result<(), SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut current = session.get(job.id)?.ok_or(SchedulerError::NotFound(job.id))?;
        current.status = if current.status == JobStatus::DeleteInProgress {
            JobStatus::Deleted
        } else {
            JobStatus::Pending
        };
        session.update(&current)?;
        session.commit()?;
        self.ctx.publisher.updated(&current, now);
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("pool", &self.pool.stats())
            .finish_non_exhaustive()
    }
}

/// Worker-side execution of one job.
async fn execute(ctx: StatusContext, processor: Arc<dyn Processor>, job: Job) {
    let proxy = Arc::new(StatusProxy::new(ctx, job));
    let job = proxy.job();
    debug!(job_id = %job.id, kind = %job.kind, status = %job.status, "starting job");

    if let Err(e) = drive(&proxy, &processor, &job).await {
        error!(job_id = %job.id, error = %e, "failed to record job outcome");
    }
    processor.dispose();

    debug!(job_id = %job.id, status = %proxy.job().status, "done processing job");
}

async fn drive(
    proxy: &Arc<StatusProxy>,
    processor: &Arc<dyn Processor>,
    job: &Job,
) -> Result<(), SchedulerError> {
    if matches!(job.status, JobStatus::Deleted | JobStatus::DeleteInProgress) {
        if !processor.initialize(Arc::clone(proxy)) {
            warn!(job_id = %job.id, "processor refused to initialize, deleting directly");
            return proxy.delete();
        }
        let worker = Arc::clone(processor);
        return match tokio::spawn(async move { worker.delete().await }).await {
            Ok(Ok(())) => match proxy.refresh() {
                Ok(_) => proxy.delete(),
                Err(SchedulerError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            },
            Ok(Err(e)) => proxy.fail(&e.message(), e.failure_type()),
            Err(e) => proxy.fail(&panic_message(e), FailureType::NonFatal),
        };
    }

    if !processor.initialize(Arc::clone(proxy)) {
        debug!(job_id = %job.id, "processor not ready, postponing");
        return proxy.postpone();
    }

    let worker = Arc::clone(processor);
    match tokio::spawn(async move { worker.process().await }).await {
        Ok(Ok(())) => match proxy.refresh()? {
            JobStatus::InProgress => proxy.complete(),
            JobStatus::Canceling => proxy.cancel(),
            _ => Ok(()),
        },
        Ok(Err(e)) => {
            error!(job_id = %job.id, kind = %job.kind, error = %e, "processing failed");
            proxy.fail(&e.message(), e.failure_type())
        }
        Err(e) => {
            let message = panic_message(e);
            error!(job_id = %job.id, kind = %job.kind, panic = %message, "processor panicked");
            proxy.fail(&message, FailureType::NonFatal)
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "processing was cancelled".into();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "processor panicked".into())
}
