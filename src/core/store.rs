//! Job store contract.
//!
//! The store is the single source of truth for job records. All reads and
//! writes happen through a [`JobSession`] obtained from [`JobStore::begin`];
//! a session serializes against every other session of the same store and its
//! mutations become visible only on [`JobSession::commit`]. Dropping a session
//! without committing discards its changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::job::{kinds, Job, JobId, JobStatus, Priority, StatusFilter};

/// Record selection used by [`JobSession::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Status predicate.
    pub status: StatusFilter,
    /// Restrict to these kinds.
    pub kinds: Option<Vec<String>>,
    /// Restrict to one scope.
    pub scope: Option<String>,
    /// Restrict to one identifier.
    pub id: Option<JobId>,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::any()
    }
}

impl JobFilter {
    /// Every record.
    #[must_use]
    pub const fn any() -> Self {
        Self::status(StatusFilter::Any)
    }

    /// Records whose status passes `status`.
    #[must_use]
    pub const fn status(status: StatusFilter) -> Self {
        Self {
            status,
            kinds: None,
            scope: None,
            id: None,
        }
    }

    /// Pending, in-progress, idle and canceling records.
    #[must_use]
    pub const fn active() -> Self {
        Self::status(StatusFilter::Active)
    }

    /// Restrict to a single kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds = Some(vec![kind.into()]);
        self
    }

    /// Restrict to any of `kinds`.
    #[must_use]
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to one scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Restrict to one identifier.
    #[must_use]
    pub const fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether `job` is selected.
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        self.status.matches(job.status)
            && self.id.is_none_or(|id| id == job.id)
            && self
                .scope
                .as_deref()
                .is_none_or(|scope| job.scope.as_deref() == Some(scope))
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.iter().any(|k| *k == job.kind))
    }
}

/// One serialized unit of work against the store.
///
/// Only [`get`](Self::get), [`fetch`](Self::fetch) and the mutators are
/// required; the scheduling queries are expressed over `fetch` and may be
/// overridden by stores that can index them.
pub trait JobSession {
    /// Record with identifier `id`.
    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError>;

    /// Records selected by `filter`, in no particular order.
    fn fetch(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError>;

    /// Add a new record.
    fn insert(&mut self, job: Job) -> Result<(), SchedulerError>;

    /// Replace an existing record.
    fn update(&mut self, job: &Job) -> Result<(), SchedulerError>;

    /// Physically purge a record.
    fn remove(&mut self, id: JobId) -> Result<(), SchedulerError>;

    /// Set or clear the reader-visible "deleted" flag on a scope.
    fn set_scope_deleted(&mut self, scope: &str, deleted: bool) -> Result<(), SchedulerError>;

    /// Whether the scope is flagged as deleted.
    fn is_scope_deleted(&self, scope: &str) -> Result<bool, SchedulerError>;

    /// Make every mutation of this session durable and visible.
    fn commit(self: Box<Self>) -> Result<(), SchedulerError>;

    /// Un-hide the scope of a study deletion that will no longer run.
    fn restore_scope(&mut self, job: &Job) -> Result<(), SchedulerError> {
        if job.kind != kinds::DELETE_STUDY {
            return Ok(());
        }
        match &job.scope {
            Some(scope) => self.set_scope_deleted(scope, false),
            None => Ok(()),
        }
    }

    /// Pending or idle jobs of exactly `priority` whose process time has come,
    /// earliest process time first.
    fn fetch_eligible(
        &self,
        priority: Priority,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs: Vec<Job> = self
            .fetch(&JobFilter::any())?
            .into_iter()
            .filter(|j| j.status.is_waiting() && j.priority == priority && j.process_time <= now)
            .collect();
        jobs.sort_by(|a, b| {
            a.process_time
                .cmp(&b.process_time)
                .then_with(|| a.scheduled_time.cmp(&b.scheduled_time))
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Finished jobs whose delete time has passed, oldest first.
    fn fetch_expired_for_deletion(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs: Vec<Job> = self
            .fetch(&JobFilter::any())?
            .into_iter()
            .filter(|j| j.status.is_terminal() && j.delete_time <= now)
            .collect();
        jobs.sort_by(|a, b| a.delete_time.cmp(&b.delete_time).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Jobs already marked `Deleted`, oldest delete time first.
    fn fetch_marked_deleted(&self, limit: usize) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs = self.fetch(&JobFilter::status(StatusFilter::Only(JobStatus::Deleted)))?;
        jobs.sort_by(|a, b| a.delete_time.cmp(&b.delete_time).then_with(|| a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Next batch for the deletion sweep: expired finished jobs, or when there
    /// are none, jobs already marked deleted.
    fn fetch_for_deletion(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, SchedulerError> {
        let expired = self.fetch_expired_for_deletion(limit, now)?;
        if expired.is_empty() {
            self.fetch_marked_deleted(limit)
        } else {
            Ok(expired)
        }
    }

    /// Jobs selected by `filter` that outrank a job scheduled at `time` with
    /// `priority`, most important first.
    fn fetch_scheduled_before_or_higher_priority(
        &self,
        time: DateTime<Utc>,
        priority: Priority,
        filter: &JobFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs: Vec<Job> = self
            .fetch(filter)?
            .into_iter()
            .filter(|j| j.is_scheduled_before_or_higher_priority(time, priority, now))
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_time.cmp(&b.scheduled_time))
        });
        Ok(jobs)
    }
}

/// Factory for serialized sessions.
pub trait JobStore: Send + Sync {
    /// Open a session; blocks while another session is open.
    fn begin(&self) -> Result<Box<dyn JobSession + '_>, SchedulerError>;
}
