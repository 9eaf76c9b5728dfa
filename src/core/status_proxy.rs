//! Narrow status-reporting interface handed to processors.
//!
//! Every operation re-reads the record, applies the processor's current
//! progress and the status change in one store session, commits, and then
//! publishes the new state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::SchedulerError;
use crate::core::events::ChangePublisher;
use crate::core::job::{Job, JobProgress, JobStatus};
use crate::core::processor::FailureType;
use crate::core::store::{JobSession, JobStore};
use crate::util::clock::SharedClock;

/// Delays applied by status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyTimings {
    /// Default postponement delay.
    pub postpone: Duration,
    /// How long a finished job is kept before the deletion sweep picks it up.
    pub delete_delay: Duration,
}

impl Default for ProxyTimings {
    fn default() -> Self {
        Self {
            postpone: Duration::seconds(30),
            delete_delay: Duration::minutes(60),
        }
    }
}

/// Collaborators shared by every status proxy of an engine.
#[derive(Clone)]
pub struct StatusContext {
    /// Backing store.
    pub store: Arc<dyn JobStore>,
    /// Time source.
    pub clock: SharedClock,
    /// Change notifications.
    pub publisher: ChangePublisher,
    /// Transition delays.
    pub timings: ProxyTimings,
}

impl StatusContext {
    /// Current time from the context clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Per-job reporting handle.
pub struct StatusProxy {
    ctx: StatusContext,
    job: Mutex<Job>,
    progress: Mutex<JobProgress>,
}

impl StatusProxy {
    /// Proxy for `job` as last read from the store.
    #[must_use]
    pub fn new(ctx: StatusContext, job: Job) -> Self {
        let progress = job.progress.clone();
        Self {
            ctx,
            job: Mutex::new(job),
            progress: Mutex::new(progress),
        }
    }

    /// Last committed state of the record as seen by this proxy.
    #[must_use]
    pub fn job(&self) -> Job {
        self.job.lock().clone()
    }

    /// Progress the processor is building up.
    #[must_use]
    pub fn progress(&self) -> JobProgress {
        self.progress.lock().clone()
    }

    /// Edit the progress in place. Nothing is published until the next
    /// status operation or [`update_progress`](Self::update_progress).
    pub fn with_progress<R>(&self, edit: impl FnOnce(&mut JobProgress) -> R) -> R {
        edit(&mut self.progress.lock())
    }

    /// Fail the job. Fatal failures do not count toward the failure count.
    pub fn fail(&self, reason: &str, failure: FailureType) -> Result<(), SchedulerError> {
        self.with_progress(|p| p.status_details = reason.to_string());
        let delete_delay = self.ctx.timings.delete_delay;
        let job = self.mutate(|job, now| {
            if failure == FailureType::NonFatal {
                job.failure_count += 1;
            }
            job.status = JobStatus::Failed;
            job.expiration_time = now;
            job.delete_time = now + delete_delay;
        })?;
        warn!(
            job_id = %job.id,
            kind = %job.kind,
            failure_count = job.failure_count,
            fatal = failure == FailureType::Fatal,
            reason,
            "job failed"
        );
        Ok(())
    }

    /// Postpone by the configured delay.
    pub fn postpone(&self) -> Result<(), SchedulerError> {
        self.postpone_for(self.ctx.timings.postpone)
    }

    /// Return the job to `Idle`, eligible again after `delay` or at the
    /// next opening of its time window.
    pub fn postpone_for(&self, delay: Duration) -> Result<(), SchedulerError> {
        let job = self.mutate(|job, now| {
            job.postpone(now, delay);
            job.status = JobStatus::Idle;
        })?;
        debug!(
            job_id = %job.id,
            process_time = %job.process_time,
            expiration_time = %job.expiration_time,
            "job postponed"
        );
        Ok(())
    }

    /// Finish successfully.
    pub fn complete(&self) -> Result<(), SchedulerError> {
        self.with_progress(|p| p.status_details.clear());
        let delete_delay = self.ctx.timings.delete_delay;
        let job = self.mutate(|job, now| {
            job.process_time = now;
            job.expiration_time = now;
            job.delete_time = now + delete_delay;
            job.status = JobStatus::Complete;
        })?;
        info!(job_id = %job.id, kind = %job.kind, description = job.description(), "job complete");
        Ok(())
    }

    /// Park the job without failing it, capped at its expiration.
    pub fn idle(&self) -> Result<(), SchedulerError> {
        let postpone = self.ctx.timings.postpone;
        let job = self.mutate(|job, now| {
            job.process_time = (now + postpone).min(job.expiration_time);
            job.status = JobStatus::Idle;
        })?;
        debug!(job_id = %job.id, process_time = %job.process_time, "job idle");
        Ok(())
    }

    /// Acknowledge a cancel request that is still being honoured.
    pub fn canceling(&self) -> Result<(), SchedulerError> {
        let job = self.mutate(|job, _| job.status = JobStatus::Canceling)?;
        debug!(job_id = %job.id, "job canceling");
        Ok(())
    }

    /// Finish as canceled. A canceled study deletion un-hides its study.
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        let delete_delay = self.ctx.timings.delete_delay;
        let job = self.mutate_in(|session, job, now| {
            job.process_time = now;
            job.expiration_time = now;
            job.delete_time = now + delete_delay;
            job.status = JobStatus::Canceled;
            session.restore_scope(job)
        })?;
        info!(job_id = %job.id, kind = %job.kind, "job canceled");
        Ok(())
    }

    /// Mark deleted and purge the record.
    pub fn delete(&self) -> Result<(), SchedulerError> {
        let id = self.job.lock().id;
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;
        job.status = JobStatus::Deleted;
        session.remove(job.id)?;
        session.commit()?;

        *self.job.lock() = job.clone();
        self.ctx.publisher.deleted(&job, now);
        debug!(job_id = %job.id, kind = %job.kind, "job deleted");
        Ok(())
    }

    /// Publish the current progress, persisting it first when `save` is set.
    pub fn update_progress(&self, save: bool) -> Result<(), SchedulerError> {
        if save {
            self.mutate(|_, _| {})?;
            return Ok(());
        }
        let job = {
            let mut job = self.job.lock();
            job.progress = self.progress();
            job.clone()
        };
        self.ctx.publisher.updated(&job, self.ctx.now());
        Ok(())
    }

    /// Status currently committed in the store.
    pub fn refresh(&self) -> Result<JobStatus, SchedulerError> {
        let id = self.job.lock().id;
        let session = self.ctx.store.begin()?;
        let job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;
        drop(session);
        let status = job.status;
        *self.job.lock() = job;
        Ok(status)
    }

    fn mutate(&self, apply: impl FnOnce(&mut Job, DateTime<Utc>)) -> Result<Job, SchedulerError> {
        self.mutate_in(|_, job, now| {
            apply(job, now);
            Ok(())
        })
    }

    fn mutate_in(
        &self,
        apply: impl FnOnce(&mut dyn JobSession, &mut Job, DateTime<Utc>) -> Result<(), SchedulerError>,
    ) -> Result<Job, SchedulerError> {
        let id = self.job.lock().id;
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;
        job.progress = self.progress();
        apply(session.as_mut(), &mut job, now)?;
        session.update(&job)?;
        session.commit()?;

        *self.job.lock() = job.clone();
        self.ctx.publisher.updated(&job, now);
        Ok(job)
    }
}

impl std::fmt::Debug for StatusProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusProxy")
            .field("job_id", &self.job.lock().id)
            .finish_non_exhaustive()
    }
}
