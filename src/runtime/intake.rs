//! Job intake: submission with per-kind policies, external edits and queries.
//!
//! Every committed change is published and wakes the scheduling loop, so a
//! new job is considered on the next cycle instead of after the poll interval.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::core::error::SchedulerError;
use crate::core::job::{kinds, Job, JobId, JobProgress, JobRequest, JobStatus, Priority};
use crate::core::scheduler::Scheduler;
use crate::core::status_proxy::StatusContext;
use crate::core::store::{JobFilter, JobSession};
use crate::runtime::api::{CancelOutcome, JobUpdate, Submission};

/// Offsets applied to new submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeSettings {
    /// Delay before a new job becomes eligible.
    pub intake_delay: Duration,
    /// Offset from submission to expiration.
    pub expire_delay: Duration,
    /// Offset from submission to the first possible deletion.
    pub delete_delay: Duration,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            intake_delay: Duration::seconds(5),
            expire_delay: Duration::seconds(90),
            delete_delay: Duration::minutes(60),
        }
    }
}

/// Entry point for hosts that create, edit and list jobs.
#[derive(Clone)]
pub struct JobIntake {
    ctx: StatusContext,
    settings: IntakeSettings,
    scheduler: Option<Arc<Scheduler>>,
}

impl JobIntake {
    /// Intake working directly against the store, without a running loop.
    #[must_use]
    pub const fn new(ctx: StatusContext, settings: IntakeSettings) -> Self {
        Self {
            ctx,
            settings,
            scheduler: None,
        }
    }

    /// Wake `scheduler` on every change and forward cancel requests to it.
    #[must_use]
    pub fn attached(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Submission offsets.
    #[must_use]
    pub const fn settings(&self) -> &IntakeSettings {
        &self.settings
    }

    /// Submit a job with default progress.
    pub fn submit(&self, request: JobRequest) -> Result<Submission, SchedulerError> {
        self.submit_with_progress(request, JobProgress::default())
    }

    /// Submit a job.
    ///
    /// A re-index is folded into an existing one that has not finished. A
    /// study deletion is folded into an unfinished deletion of the same
    /// scope; the first one for a scope hides the scope from readers.
    pub fn submit_with_progress(
        &self,
        request: JobRequest,
        progress: JobProgress,
    ) -> Result<Submission, SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;

        if let Some(existing) = find_duplicate(session.as_ref(), &request)? {
            debug!(job_id = %existing.id, kind = %existing.kind, "submission folded into existing job");
            return Ok(Submission {
                job: existing,
                deduplicated: true,
            });
        }

        let job = self.new_job(request, progress, now);
        if job.kind == kinds::DELETE_STUDY {
            if let Some(scope) = &job.scope {
                session.set_scope_deleted(scope, true)?;
            }
        }
        session.insert(job.clone())?;
        session.commit()?;

        info!(
            job_id = %job.id,
            kind = %job.kind,
            priority = %job.priority,
            scope = job.scope.as_deref().unwrap_or(""),
            "job submitted"
        );
        self.changed(&job, now);
        Ok(Submission {
            job,
            deduplicated: false,
        })
    }

    /// Apply an external edit.
    pub fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, SchedulerError> {
        if update.delete {
            return self.delete(id);
        }
        if update.cancel {
            self.cancel(id)?;
            return self.get(id)?.ok_or(SchedulerError::NotFound(id));
        }

        let now = self.ctx.now();
        let delete_delay = self.settings.delete_delay;
        let mut session = self.ctx.store.begin()?;
        let mut job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;

        if let Some(priority) = update.priority {
            job.priority = priority;
        }
        if let Some(at) = update.process_time {
            job.process_time = at;
        }
        if let Some(at) = update.expiration_time {
            job.expiration_time = at;
        }
        let mut forward_cancel = false;
        if let Some(to) = update.status {
            let from = job.status;
            if from != to {
                if !from.can_transition_to(to) {
                    return Err(SchedulerError::InvalidTransition { id, from, to });
                }
                match to {
                    JobStatus::Canceled => {
                        job.delete_time = now + delete_delay;
                        session.restore_scope(&job)?;
                    }
                    JobStatus::Deleted => session.restore_scope(&job)?,
                    JobStatus::Pending => {
                        job.failure_count = 0;
                        job.scheduled_time = now;
                        job.process_time = now;
                        job.expiration_time = job.expiration_time.max(now);
                    }
                    JobStatus::Canceling => forward_cancel = from == JobStatus::InProgress,
                    _ => {}
                }
                job.status = to;
            }
        }
        session.update(&job)?;
        session.commit()?;

        debug!(job_id = %job.id, status = %job.status, priority = %job.priority, "job updated");
        if forward_cancel {
            self.forward_cancel(id);
        }
        self.changed(&job, now);
        Ok(job)
    }

    /// Delete a job that has not started.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidTransition`] when the job is running or the
    /// deletion sweep already owns it.
    pub fn delete(&self, id: JobId) -> Result<Job, SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;
        if job.status.is_running() || job.status == JobStatus::DeleteInProgress {
            return Err(SchedulerError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Deleted,
            });
        }
        if job.status == JobStatus::Deleted {
            return Ok(job);
        }
        if job.status.is_waiting() {
            session.restore_scope(&job)?;
        }
        job.status = JobStatus::Deleted;
        session.update(&job)?;
        session.commit()?;

        info!(job_id = %job.id, kind = %job.kind, "job marked deleted");
        self.changed(&job, now);
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// A waiting job is canceled immediately. A running job moves to
    /// `Canceling` and its processor is asked to stop; the outcome is
    /// recorded when the processor returns.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotCancelable`] when the progress forbids it or the
    /// job already finished.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, SchedulerError> {
        let now = self.ctx.now();
        let mut session = self.ctx.store.begin()?;
        let mut job = session.get(id)?.ok_or(SchedulerError::NotFound(id))?;
        if !job.progress.cancelable {
            return Err(SchedulerError::NotCancelable(id));
        }

        let outcome = match job.status {
            JobStatus::Pending | JobStatus::Idle => {
                job.status = JobStatus::Canceled;
                job.process_time = now;
                job.expiration_time = now;
                job.delete_time = now + self.settings.delete_delay;
                session.restore_scope(&job)?;
                CancelOutcome::Canceled
            }
            JobStatus::InProgress => {
                job.status = JobStatus::Canceling;
                CancelOutcome::Requested
            }
            JobStatus::Canceling => return Ok(CancelOutcome::Requested),
            _ => return Err(SchedulerError::NotCancelable(id)),
        };
        session.update(&job)?;
        session.commit()?;

        info!(job_id = %job.id, kind = %job.kind, outcome = ?outcome, "cancel requested");
        if outcome == CancelOutcome::Requested {
            self.forward_cancel(id);
        }
        self.changed(&job, now);
        Ok(outcome)
    }

    /// Change only the priority.
    pub fn set_priority(&self, id: JobId, priority: Priority) -> Result<Job, SchedulerError> {
        self.update(id, JobUpdate::default().with_priority(priority))
    }

    /// One job by identifier.
    pub fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        self.ctx.store.begin()?.get(id)
    }

    /// Jobs matching `filter`, earliest schedule first.
    pub fn query(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs = self.ctx.store.begin()?.fetch(filter)?;
        jobs.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then(a.requested_time.cmp(&b.requested_time))
        });
        Ok(jobs)
    }

    /// Whether a pending study deletion hides `scope`.
    pub fn is_scope_deleted(&self, scope: &str) -> Result<bool, SchedulerError> {
        self.ctx.store.begin()?.is_scope_deleted(scope)
    }

    fn new_job(&self, request: JobRequest, progress: JobProgress, now: DateTime<Utc>) -> Job {
        let mut job = Job::new(request, progress, now);
        let scheduled = match job.request.time_window {
            Some(window) if job.priority != Priority::Stat => {
                window.scheduled_time(now, self.settings.intake_delay)
            }
            _ => now + self.settings.intake_delay,
        };
        job.scheduled_time = scheduled;
        job.process_time = scheduled;
        job.expiration_time = (now + self.settings.expire_delay).max(scheduled);
        job.delete_time = now + self.settings.delete_delay;
        job
    }

    fn forward_cancel(&self, id: JobId) {
        if let Some(scheduler) = &self.scheduler {
            if !scheduler.cancel(id) {
                debug!(job_id = %id, "cancel requested for a job no worker holds");
            }
        }
    }

    fn changed(&self, job: &Job, now: DateTime<Utc>) {
        self.ctx.publisher.updated(job, now);
        if let Some(scheduler) = &self.scheduler {
            scheduler.signal();
        }
    }
}

impl std::fmt::Debug for JobIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobIntake")
            .field("settings", &self.settings)
            .field("attached", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}

fn find_duplicate(
    session: &dyn JobSession,
    request: &JobRequest,
) -> Result<Option<Job>, SchedulerError> {
    let unfinished = |job: &Job| {
        matches!(
            job.status,
            JobStatus::Pending | JobStatus::Idle | JobStatus::InProgress
        )
    };
    let filter = match (request.kind.as_str(), request.scope.as_deref()) {
        (kinds::REINDEX, _) => JobFilter::active().with_kind(kinds::REINDEX),
        (kinds::DELETE_STUDY, Some(scope)) if !scope.is_empty() => {
            JobFilter::active().with_kind(kinds::DELETE_STUDY).with_scope(scope)
        }
        _ => return Ok(None),
    };
    Ok(session.fetch(&filter)?.into_iter().find(unfinished))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::ChangePublisher;
    use crate::core::job::TimeWindow;
    use crate::core::status_proxy::ProxyTimings;
    use crate::infra::store::InMemoryJobStore;
    use crate::util::clock::ManualClock;
    use chrono::TimeZone;

    fn intake() -> (JobIntake, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()));
        let ctx = StatusContext {
            store: Arc::new(InMemoryJobStore::new()),
            clock: clock.clone(),
            publisher: ChangePublisher::null(),
            timings: ProxyTimings::default(),
        };
        (JobIntake::new(ctx, IntakeSettings::default()), clock)
    }

    #[test]
    fn submit_applies_offsets() {
        let (intake, clock) = intake();
        let now = crate::util::clock::Clock::now(clock.as_ref());
        let job = intake.submit(JobRequest::import_files()).unwrap().job;

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.requested_time, now);
        assert_eq!(job.process_time, now + Duration::seconds(5));
        assert_eq!(job.scheduled_time, job.process_time);
        assert_eq!(job.expiration_time, now + Duration::seconds(90));
        assert_eq!(job.delete_time, now + Duration::minutes(60));
    }

    #[test]
    fn window_defers_initial_schedule() {
        let (intake, _) = intake();
        let job = intake
            .submit(JobRequest::send_study("s").with_time_window(TimeWindow::new(20, 23)))
            .unwrap()
            .job;
        assert_eq!(job.process_time, Utc.with_ymd_and_hms(2026, 3, 4, 20, 0, 0).unwrap());
        assert!(job.expiration_time >= job.process_time);
    }

    #[test]
    fn reindex_is_deduplicated() {
        let (intake, _) = intake();
        let first = intake.submit(JobRequest::reindex()).unwrap();
        let second = intake.submit(JobRequest::reindex()).unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.job.id, second.job.id);
    }

    #[test]
    fn update_rejects_illegal_transition() {
        let (intake, _) = intake();
        let job = intake.submit(JobRequest::import_files()).unwrap().job;
        let err = intake.update(job.id, JobUpdate::status(JobStatus::Complete)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    }
}
