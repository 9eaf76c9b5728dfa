//! Tests for the job data model

use chrono::{Duration, TimeZone, Utc};

use prometheus_work_queue::core::{
    kinds, ConcurrencyClass, Job, JobProgress, JobRequest, JobStatus, Priority, StatusFilter,
    TimeWindow,
};

#[test]
fn test_request_constructors() {
    let send = JobRequest::send_study("1.2");
    assert_eq!(send.kind, kinds::DICOM_SEND);
    assert_eq!(send.concurrency, ConcurrencyClass::ScopeRead);
    assert_eq!(send.scope.as_deref(), Some("1.2"));

    let reindex = JobRequest::reindex();
    assert_eq!(reindex.kind, kinds::REINDEX);
    assert_eq!(reindex.concurrency, ConcurrencyClass::Exclusive);
    assert!(reindex.scope.is_none());

    let delete = JobRequest::delete_study("1.2");
    assert_eq!(delete.concurrency, ConcurrencyClass::ScopeDelete);
}

#[test]
fn test_job_round_trips_through_json() {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let job = Job::new(
        JobRequest::process_study("s")
            .with_priority(Priority::Stat)
            .with_data(serde_json::json!({ "files": 12 })),
        JobProgress::non_cancelable(),
        now,
    );
    let json = serde_json::to_string(&job).unwrap();
    let back: Job = serde_json::from_str(&json).unwrap();
    assert_eq!(back, job);
    assert!(!back.progress.cancelable);
}

#[test]
fn test_status_filters() {
    assert!(StatusFilter::Active.matches(JobStatus::Canceling));
    assert!(!StatusFilter::Active.matches(JobStatus::Complete));
    assert!(StatusFilter::RunningOrIdle.matches(JobStatus::Idle));
    assert!(!StatusFilter::Running.matches(JobStatus::Pending));
    assert!(StatusFilter::from(JobStatus::Deleted).matches(JobStatus::Deleted));
}

#[test]
fn test_terminal_jobs_may_be_resubmitted() {
    assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));
    assert!(JobStatus::Canceled.can_transition_to(JobStatus::Pending));
    assert!(!JobStatus::Complete.can_transition_to(JobStatus::Pending));
    assert!(!JobStatus::Deleted.can_transition_to(JobStatus::Pending));
}

#[test]
fn test_postpone_raises_expiration() {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let mut job = Job::new(JobRequest::import_files(), JobProgress::default(), now);
    job.postpone(now, Duration::minutes(5));
    assert_eq!(job.process_time, now + Duration::minutes(5));
    assert_eq!(job.expiration_time, job.process_time);
    assert_eq!(job.scheduled_time, now);
}

#[test]
fn test_window_postpone_moves_schedule() {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let mut job = Job::new(
        JobRequest::send_study("s").with_time_window(TimeWindow::new(22, 6)),
        JobProgress::default(),
        now,
    );
    job.postpone(now, Duration::seconds(30));
    let opening = Utc.with_ymd_and_hms(2026, 1, 1, 22, 0, 0).unwrap();
    assert_eq!(job.process_time, opening);
    assert_eq!(job.scheduled_time, opening);
}
