//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::job::{JobId, JobStatus};

/// Errors produced by engine components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job store rejected a query or commit.
    #[error("store error: {0}")]
    Store(String),
    /// No job record exists with the identifier.
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// The requested status change is not allowed by the job state machine.
    #[error("invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        /// Job being edited.
        id: JobId,
        /// Status the job currently has.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },
    /// The job's progress declares it non-cancelable, or it already finished.
    #[error("job {0} cannot be canceled")]
    NotCancelable(JobId),
    /// No processor constructor is registered for the job kind.
    #[error("no processor registered for job kind `{0}`")]
    NoProcessor(String),
    /// The worker pool has been shut down.
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// The worker pool queue cannot take more work.
    #[error("worker pool queue is full")]
    QueueFull,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
