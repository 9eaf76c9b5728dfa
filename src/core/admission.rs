//! Admission checks deciding whether a waiting job may start now.
//!
//! Three gates must all pass:
//! - global exclusivity: `Exclusive` jobs conflict with everything, in any scope
//! - per-scope compatibility: incompatible classes sharing a scope must take turns
//! - per-kind running limits from configuration
//!
//! A `Pending` candidate yields to more important `Pending` competitors and to
//! anything that already holds a slot or an `Idle` position. An `Idle` candidate
//! only yields to running competitors and to more important `Idle` ones; a
//! `Pending` competitor never blocks it. Two pending jobs that each consider the
//! other more important cannot both wait forever because only one of them can be
//! the earlier one, and once postponed the waiting side is judged only against
//! work that has already secured its position.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::job::{ConcurrencyClass, Job, JobId, JobStatus};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The candidate may start.
    Start,
    /// The candidate must wait.
    Wait(WaitReason),
}

impl Admission {
    /// Whether the candidate was admitted.
    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }
}

/// Diagnostic attached to a refused admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReason {
    /// Job reported as the reason for waiting.
    pub blocker: JobId,
    /// Text stored in the candidate's status details.
    pub message: String,
}

/// Decide whether `candidate` may start, given every other active job.
///
/// `others` may contain the candidate itself; it is skipped by identifier.
#[must_use]
pub fn can_start(
    candidate: &Job,
    others: &[Job],
    now: DateTime<Utc>,
    kind_limits: &HashMap<String, usize>,
) -> Admission {
    let mut blockers: Vec<&Job> = Vec::new();

    for other in others.iter().filter(|o| o.id != candidate.id) {
        if blocks_exclusively(candidate, other, now) || blocks_in_scope(candidate, other, now) {
            blockers.push(other);
        }
    }

    if let Some(&limit) = kind_limits.get(&candidate.kind) {
        let running: Vec<&Job> = others
            .iter()
            .filter(|o| o.id != candidate.id && o.kind == candidate.kind && o.status.is_running())
            .collect();
        if running.len() >= limit {
            blockers.extend(running);
        }
    }

    // Report the least important blocker, furthest out.
    blockers
        .into_iter()
        .min_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.process_time.cmp(&a.process_time))
        })
        .map_or(Admission::Start, |blocker| {
            Admission::Wait(WaitReason {
                blocker: blocker.id,
                message: format!("Waiting for: {}", blocker.description()),
            })
        })
}

/// Whether `other` outranks `candidate` in the schedule.
fn more_important(other: &Job, candidate: &Job, now: DateTime<Utc>) -> bool {
    other.is_scheduled_before_or_higher_priority(candidate.scheduled_time, candidate.priority, now)
}

/// Status-based part shared by both gates once a conflict between classes exists.
fn outranks_waiting(candidate: &Job, other: &Job, now: DateTime<Utc>) -> bool {
    match (candidate.status, other.status) {
        (_, s) if s.is_running() => true,
        (JobStatus::Pending, JobStatus::Idle) => true,
        (JobStatus::Pending, JobStatus::Pending) | (JobStatus::Idle, JobStatus::Idle) => {
            more_important(other, candidate, now)
        }
        _ => false,
    }
}

fn blocks_exclusively(candidate: &Job, other: &Job, now: DateTime<Utc>) -> bool {
    let exclusive = candidate.concurrency == ConcurrencyClass::Exclusive
        || other.concurrency == ConcurrencyClass::Exclusive;
    exclusive && outranks_waiting(candidate, other, now)
}

fn blocks_in_scope(candidate: &Job, other: &Job, now: DateTime<Utc>) -> bool {
    let Some(scope) = candidate.scope.as_deref() else {
        return false;
    };
    other.scope.as_deref() == Some(scope)
        && !candidate
            .concurrency
            .can_run_concurrently_with(other.concurrency)
        && outranks_waiting(candidate, other, now)
}

/// Consistent view of the active jobs used for one admission pass.
///
/// Jobs admitted during the pass are recorded as running so that later
/// candidates in the same pass see them.
#[derive(Debug, Clone)]
pub struct AdmissionSnapshot {
    now: DateTime<Utc>,
    jobs: Vec<Job>,
    kind_limits: HashMap<String, usize>,
}

impl AdmissionSnapshot {
    /// Snapshot of `jobs` taken at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>, jobs: Vec<Job>) -> Self {
        Self {
            now,
            jobs,
            kind_limits: HashMap::new(),
        }
    }

    /// Apply per-kind running limits.
    #[must_use]
    pub fn with_kind_limits(mut self, kind_limits: HashMap<String, usize>) -> Self {
        self.kind_limits = kind_limits;
        self
    }

    /// Time the snapshot was taken.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Jobs in the snapshot.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Check `candidate` against the snapshot.
    #[must_use]
    pub fn can_start(&self, candidate: &Job) -> Admission {
        can_start(candidate, &self.jobs, self.now, &self.kind_limits)
    }

    /// Record `job` as running from now on.
    pub fn mark_started(&mut self, job: &Job) {
        let mut started = job.clone();
        started.status = JobStatus::InProgress;
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = started,
            None => self.jobs.push(started),
        }
    }
}
