//! Tests for change notification sinks

use std::time::Duration;

use chrono::Utc;

use prometheus_work_queue::core::{
    ChangeKind, ChangePublisher, ChannelChangeSink, InMemoryChangeSink, Job, JobProgress,
    JobRequest, JobStatus,
};

fn job() -> Job {
    Job::new(JobRequest::send_study("1.2.3"), JobProgress::default(), Utc::now())
}

#[test]
fn test_publisher_clones_share_the_sink() {
    let sink = InMemoryChangeSink::new(8);
    let publisher = ChangePublisher::new(sink.clone());
    let clone = publisher.clone();
    let mut job = job();

    publisher.updated(&job, Utc::now());
    job.status = JobStatus::InProgress;
    clone.updated(&job, Utc::now());

    let events = sink.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].job.status, JobStatus::InProgress);
    assert_eq!(events[1].job.scope.as_deref(), Some("1.2.3"));
    assert!(sink.events().is_empty());
}

#[test]
fn test_channel_sink_reaches_another_thread() {
    let (sink, rx) = ChannelChangeSink::new();
    let publisher = ChangePublisher::new(sink);
    let job = job();
    let expected = job.id;

    let subscriber = std::thread::spawn(move || rx.recv_timeout(Duration::from_secs(5)));
    publisher.deleted(&job, Utc::now());

    let event = subscriber.join().unwrap().unwrap();
    assert_eq!(event.kind, ChangeKind::Delete);
    assert_eq!(event.job.id, expected);
}

#[test]
fn test_dropped_subscriber_is_ignored() {
    let (sink, rx) = ChannelChangeSink::new();
    drop(rx);
    let publisher = ChangePublisher::new(sink);
    publisher.updated(&job(), Utc::now());
}

#[test]
fn test_event_serializes_with_snake_case_kind() {
    let sink = InMemoryChangeSink::new(1);
    ChangePublisher::new(sink.clone()).updated(&job(), Utc::now());
    let json = serde_json::to_value(&sink.events()[0]).unwrap();
    assert_eq!(json["kind"], "update");
    assert_eq!(json["job"]["status"], "pending");
}
