//! Tests for error types

use prometheus_work_queue::core::{
    FailureType, JobId, JobStatus, ProcessError, SchedulerError,
};

#[test]
fn test_queue_full_error() {
    assert_eq!(SchedulerError::QueueFull.to_string(), "worker pool queue is full");
}

#[test]
fn test_no_processor_error() {
    let err = SchedulerError::NoProcessor("DicomSend".into());
    assert_eq!(err.to_string(), "no processor registered for job kind `DicomSend`");
}

#[test]
fn test_invalid_transition_error() {
    let id = JobId::new();
    let err = SchedulerError::InvalidTransition {
        id,
        from: JobStatus::Complete,
        to: JobStatus::InProgress,
    };
    assert_eq!(
        err.to_string(),
        format!("invalid status transition for job {id}: Complete -> InProgress")
    );
}

#[test]
fn test_not_found_error() {
    let id = JobId::new();
    assert_eq!(SchedulerError::NotFound(id).to_string(), format!("job not found: {id}"));
}

#[test]
fn test_scheduler_error_converts_to_anyhow() {
    let result: prometheus_work_queue::core::AppResult<()> =
        Err(SchedulerError::PoolShutdown.into());
    assert_eq!(
        result.unwrap_err().to_string(),
        "worker pool has been shut down"
    );
}

#[test]
fn test_process_error_classification() {
    assert_eq!(
        ProcessError::OutOfResources("disk full".into()).failure_type(),
        FailureType::Fatal
    );
    assert_eq!(
        ProcessError::Failed("rejected".into()).failure_type(),
        FailureType::NonFatal
    );
    let other: ProcessError = anyhow::anyhow!("socket closed").into();
    assert_eq!(other.failure_type(), FailureType::NonFatal);
    assert_eq!(other.message(), "socket closed");
}
