//! Tests for API request/response models

use chrono::Utc;

use prometheus_work_queue::core::{Job, JobProgress, JobRequest, JobStatus, Priority};
use prometheus_work_queue::runtime::{JobStatusResponse, JobUpdate};

#[test]
fn test_update_builders() {
    assert!(JobUpdate::default().is_empty());
    assert!(JobUpdate::delete().delete);
    assert!(JobUpdate::cancel().cancel);

    let update = JobUpdate::status(JobStatus::Pending).with_priority(Priority::High);
    assert_eq!(update.status, Some(JobStatus::Pending));
    assert_eq!(update.priority, Some(Priority::High));
    assert!(!update.is_empty());
}

#[test]
fn test_update_from_json() {
    let update: JobUpdate =
        serde_json::from_str(r#"{ "status": "canceled", "priority": "stat" }"#).unwrap();
    assert!(!update.delete);
    assert!(!update.cancel);
    assert_eq!(update.status, Some(JobStatus::Canceled));
    assert_eq!(update.priority, Some(Priority::Stat));
    assert!(update.process_time.is_none());
}

#[test]
fn test_status_response_from_job() {
    let mut job = Job::new(JobRequest::reindex(), JobProgress::default(), Utc::now());
    job.status = JobStatus::Failed;
    job.failure_count = 2;
    job.progress.status_details = "index locked".into();

    let response = JobStatusResponse::from(&job);
    assert_eq!(response.id, job.id);
    assert_eq!(response.status, JobStatus::Failed);
    assert_eq!(response.failure_count, 2);
    assert_eq!(response.status_details, "index locked");
}
