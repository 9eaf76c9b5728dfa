//! In-memory job store.
//!
//! A session holds the store mutex for its whole lifetime and works on a
//! private copy of the state, so concurrent sessions are serialized and a
//! dropped session leaves the store untouched.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobId};
use crate::core::store::{JobFilter, JobSession, JobStore};

/// Records and scope flags held by a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub(crate) jobs: HashMap<JobId, Job>,
    pub(crate) deleted_scopes: BTreeSet<String>,
}

/// Session over a [`StoreState`] guarded by a store mutex.
pub(crate) struct StateSession<'a> {
    guard: MutexGuard<'a, StoreState>,
    working: StoreState,
    persist_to: Option<&'a Path>,
}

impl<'a> StateSession<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, StoreState>, persist_to: Option<&'a Path>) -> Self {
        let working = guard.clone();
        Self {
            guard,
            working,
            persist_to,
        }
    }
}

impl JobSession for StateSession<'_> {
    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.working.jobs.get(&id).cloned())
    }

    fn fetch(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError> {
        if let Some(id) = filter.id {
            return Ok(self
                .working
                .jobs
                .get(&id)
                .filter(|j| filter.matches(j))
                .cloned()
                .into_iter()
                .collect());
        }
        Ok(self
            .working
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect())
    }

    fn insert(&mut self, job: Job) -> Result<(), SchedulerError> {
        if self.working.jobs.contains_key(&job.id) {
            return Err(SchedulerError::Store(format!("job {} already exists", job.id)));
        }
        self.working.jobs.insert(job.id, job);
        Ok(())
    }

    fn update(&mut self, job: &Job) -> Result<(), SchedulerError> {
        let slot = self
            .working
            .jobs
            .get_mut(&job.id)
            .ok_or(SchedulerError::NotFound(job.id))?;
        *slot = job.clone();
        Ok(())
    }

    fn remove(&mut self, id: JobId) -> Result<(), SchedulerError> {
        self.working
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::NotFound(id))
    }

    fn set_scope_deleted(&mut self, scope: &str, deleted: bool) -> Result<(), SchedulerError> {
        if deleted {
            self.working.deleted_scopes.insert(scope.to_string());
        } else {
            self.working.deleted_scopes.remove(scope);
        }
        Ok(())
    }

    fn is_scope_deleted(&self, scope: &str) -> Result<bool, SchedulerError> {
        Ok(self.working.deleted_scopes.contains(scope))
    }

    fn commit(self: Box<Self>) -> Result<(), SchedulerError> {
        let Self {
            mut guard,
            working,
            persist_to,
        } = *self;
        if let Some(path) = persist_to {
            super::file::write_state(path, &working)?;
        }
        *guard = working;
        Ok(())
    }
}

/// Reference store keeping every record in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

impl InMemoryJobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `jobs`, as if left behind by an earlier run.
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let state = StoreState {
            jobs: jobs.into_iter().map(|j| (j.id, j)).collect(),
            deleted_scopes: BTreeSet::new(),
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Number of records, including finished ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn begin(&self) -> Result<Box<dyn JobSession + '_>, SchedulerError> {
        Ok(Box::new(StateSession::new(self.state.lock(), None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{kinds, JobProgress, JobRequest, JobStatus, Priority, StatusFilter};
    use chrono::{Duration, TimeZone, Utc};

    fn make_job(request: JobRequest, minutes_from_base: i64) -> Job {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let mut job = Job::new(request, JobProgress::default(), base);
        job.process_time = base + Duration::minutes(minutes_from_base);
        job.scheduled_time = job.process_time;
        job
    }

    #[test]
    fn uncommitted_session_is_discarded() {
        let store = InMemoryJobStore::new();
        {
            let mut session = store.begin().unwrap();
            session.insert(make_job(JobRequest::import_files(), 0)).unwrap();
        }
        assert!(store.is_empty());

        let mut session = store.begin().unwrap();
        session.insert(make_job(JobRequest::import_files(), 0)).unwrap();
        session.commit().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eligible_jobs_by_priority_and_process_time() {
        let later = make_job(JobRequest::send_study("a"), 5);
        let earlier = make_job(JobRequest::send_study("b"), 1);
        let future = make_job(JobRequest::send_study("c"), 60);
        let normal = make_job(JobRequest::send_study("d").with_priority(Priority::Normal), 0);
        let mut running = make_job(JobRequest::send_study("e"), 0);
        running.status = JobStatus::InProgress;

        let store = InMemoryJobStore::with_jobs([
            later.clone(),
            earlier.clone(),
            future,
            normal,
            running,
        ]);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 10, 0).unwrap();
        let session = store.begin().unwrap();
        let ids: Vec<_> = session
            .fetch_eligible(Priority::High, 10, now)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![earlier.id, later.id]);
        assert_eq!(session.fetch_eligible(Priority::High, 1, now).unwrap().len(), 1);
    }

    #[test]
    fn outranking_jobs_most_important_first() {
        let stat = make_job(JobRequest::send_study("s1").with_priority(Priority::Stat), 8);
        let earliest = make_job(JobRequest::send_study("s1"), 1);
        let earlier = make_job(JobRequest::send_study("s1"), 3);
        let same_but_later = make_job(JobRequest::send_study("s1"), 7);
        let future_stat = make_job(JobRequest::send_study("s1").with_priority(Priority::Stat), 30);
        let other_scope = make_job(JobRequest::send_study("s2"), 0);
        let other_kind = make_job(JobRequest::process_study("s1"), 0);
        let store = InMemoryJobStore::with_jobs([
            stat.clone(),
            earlier.clone(),
            earliest.clone(),
            same_but_later,
            future_stat,
            other_scope,
            other_kind,
        ]);

        let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let session = store.begin().unwrap();
        let filter = JobFilter::active()
            .with_kinds([kinds::DICOM_SEND])
            .with_scope("s1");
        let ids: Vec<_> = session
            .fetch_scheduled_before_or_higher_priority(
                base + Duration::minutes(5),
                Priority::High,
                &filter,
                base + Duration::minutes(10),
            )
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![stat.id, earliest.id, earlier.id]);
    }

    #[test]
    fn deletion_prefers_expired_over_marked() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let mut expired = make_job(JobRequest::import_files(), 0);
        expired.status = JobStatus::Complete;
        expired.delete_time = now - Duration::minutes(1);
        let mut not_yet = make_job(JobRequest::import_files(), 0);
        not_yet.status = JobStatus::Failed;
        not_yet.delete_time = now + Duration::minutes(1);
        let mut marked = make_job(JobRequest::import_files(), 0);
        marked.status = JobStatus::Deleted;

        let store = InMemoryJobStore::with_jobs([expired.clone(), not_yet, marked.clone()]);
        let mut session = store.begin().unwrap();
        let batch = session.fetch_for_deletion(10, now).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, expired.id);

        session.remove(expired.id).unwrap();
        let batch = session.fetch_for_deletion(10, now).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, marked.id);
    }

    #[test]
    fn filters_by_scope_kind_and_status() {
        let send = make_job(JobRequest::send_study("s1"), 0);
        let process = make_job(JobRequest::process_study("s1"), 0);
        let other = make_job(JobRequest::send_study("s2"), 0);
        let store = InMemoryJobStore::with_jobs([send.clone(), process, other]);
        let session = store.begin().unwrap();

        let found = session
            .fetch(&JobFilter::active().with_scope("s1").with_kind(send.kind.clone()))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, send.id);
        assert!(session
            .fetch(&JobFilter::status(StatusFilter::Running))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scope_deleted_flag_round_trips() {
        let store = InMemoryJobStore::new();
        let mut session = store.begin().unwrap();
        session.set_scope_deleted("1.2.3", true).unwrap();
        session.commit().unwrap();

        let mut session = store.begin().unwrap();
        assert!(session.is_scope_deleted("1.2.3").unwrap());
        session.set_scope_deleted("1.2.3", false).unwrap();
        assert!(!session.is_scope_deleted("1.2.3").unwrap());
    }
}
