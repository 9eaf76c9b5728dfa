//! Integration tests for the capacity-aware worker pool.
//!
//! - stat work borrowing normal slots
//! - hand-off queue back-pressure
//! - counters after a burst of work

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use common::wait_until;
use prometheus_work_queue::core::{
    Job, JobProgress, JobRequest, Lane, PoolConfig, Priority, ProcessError, Processor, SchedulerError,
    StatusProxy, WakeSignal, WorkerPool,
};

struct Idle;

#[async_trait]
impl Processor for Idle {
    fn initialize(&self, _proxy: Arc<StatusProxy>) -> bool {
        true
    }

    async fn process(&self) -> Result<(), ProcessError> {
        Ok(())
    }
}

fn job(priority: Priority) -> Job {
    Job::new(
        JobRequest::import_files().with_priority(priority),
        JobProgress::default(),
        Utc::now(),
    )
}

fn blocked(rx: &crossbeam_channel::Receiver<()>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    let rx = rx.clone();
    Box::pin(async move {
        let _ = tokio::task::spawn_blocking(move || rx.recv()).await;
    })
}

#[test]
fn stat_work_may_fill_every_slot() {
    let pool = WorkerPool::new(PoolConfig::new(1, 3), Arc::new(WakeSignal::new())).unwrap();
    let (release, rx) = crossbeam_channel::unbounded::<()>();

    for expected_left in (0..4).rev() {
        pool.enqueue(&job(Priority::Stat), Lane::Stat, Arc::new(Idle), blocked(&rx))
            .unwrap();
        // The one reserved slot is taken, so both lanes see the same room.
        assert_eq!(pool.stat_available(), expected_left);
        assert_eq!(pool.normal_available(), expected_left);
    }
    assert_eq!(pool.stats().stat_in_use, 4);

    drop(release);
    assert!(wait_until(Duration::from_secs(5), || pool.stats().completed == 4));
    assert_eq!(pool.stat_available(), 4);
    assert_eq!(pool.normal_available(), 3);
    pool.shutdown(Duration::from_secs(2));
}

#[test]
fn normal_work_leaves_the_reservation_alone() {
    let pool = WorkerPool::new(PoolConfig::new(2, 1), Arc::new(WakeSignal::new())).unwrap();
    let (release, rx) = crossbeam_channel::unbounded::<()>();

    pool.enqueue(&job(Priority::High), Lane::Normal, Arc::new(Idle), blocked(&rx))
        .unwrap();
    assert_eq!(pool.normal_available(), 0);
    assert_eq!(pool.stat_available(), 2);

    pool.enqueue(&job(Priority::Stat), Lane::Stat, Arc::new(Idle), blocked(&rx))
        .unwrap();
    assert_eq!(pool.normal_available(), 0);
    assert_eq!(pool.stat_available(), 1);

    drop(release);
    assert!(wait_until(Duration::from_secs(5), || pool.stats().completed == 2));
    pool.shutdown(Duration::from_secs(2));
}

#[test]
fn saturated_queue_pushes_back() {
    let pool = WorkerPool::new(PoolConfig::new(0, 1), Arc::new(WakeSignal::new())).unwrap();
    let (release, rx) = crossbeam_channel::unbounded::<()>();

    pool.enqueue(&job(Priority::Normal), Lane::Normal, Arc::new(Idle), blocked(&rx))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || pool.stats().active == 1));

    for _ in 0..4 {
        pool.enqueue(&job(Priority::Normal), Lane::Normal, Arc::new(Idle), blocked(&rx))
            .unwrap();
    }
    let overflow = pool.enqueue(&job(Priority::Normal), Lane::Normal, Arc::new(Idle), blocked(&rx));
    assert!(matches!(overflow, Err(SchedulerError::QueueFull)));
    assert_eq!(pool.stats().queued, 4);
    assert_eq!(pool.stats().submitted, 5);

    drop(release);
    assert!(wait_until(Duration::from_secs(5), || pool.stats().completed == 5));
    let stats = pool.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.panicked, 0);
    pool.shutdown(Duration::from_secs(2));
}
