//! API-facing request/response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobId, JobStatus, Priority};
use crate::core::worker_pool::PoolStats;

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// The stored job: either the new record or the one it was folded into.
    pub job: Job,
    /// True when an equivalent job already existed and nothing was inserted.
    pub deduplicated: bool,
}

/// Externally requested edit of a job.
///
/// `delete` wins over `cancel`, which wins over field edits. Field edits are
/// applied in one session, status last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    /// Remove a job that has not started.
    #[serde(default)]
    pub delete: bool,
    /// Request cancellation.
    #[serde(default)]
    pub cancel: bool,
    /// Explicit status change.
    pub status: Option<JobStatus>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New earliest processing time.
    pub process_time: Option<DateTime<Utc>>,
    /// New expiration time.
    pub expiration_time: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Delete request.
    #[must_use]
    pub fn delete() -> Self {
        Self {
            delete: true,
            ..Self::default()
        }
    }

    /// Cancel request.
    #[must_use]
    pub fn cancel() -> Self {
        Self {
            cancel: true,
            ..Self::default()
        }
    }

    /// Explicit status change.
    #[must_use]
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Change the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Change the earliest processing time.
    #[must_use]
    pub const fn with_process_time(mut self, at: DateTime<Utc>) -> Self {
        self.process_time = Some(at);
        self
    }

    /// Change the expiration time.
    #[must_use]
    pub const fn with_expiration_time(mut self, at: DateTime<Utc>) -> Self {
        self.expiration_time = Some(at);
        self
    }

    /// Whether the update asks for nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.delete
            && !self.cancel
            && self.status.is_none()
            && self.priority.is_none()
            && self.process_time.is_none()
            && self.expiration_time.is_none()
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job had not started and is now `Canceled`.
    Canceled,
    /// The job is running; the processor was asked to stop.
    Requested,
}

/// Job status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// Job identifier.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Waiting reason, failure message or current step.
    pub status_details: String,
    /// Non-fatal failures so far.
    pub failure_count: u32,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            status_details: job.progress.status_details.clone(),
            failure_count: job.failure_count,
        }
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Whether the scheduling loop thread is alive.
    pub running: bool,
    /// Worker pool utilization.
    pub pool: PoolStats,
}
