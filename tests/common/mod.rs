//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use prometheus_work_queue::core::{
    ChangePublisher, InMemoryChangeSink, Job, JobFilter, JobId, JobProgress, JobRequest, JobStatus,
    JobStore, ProcessError, Processor, ProxyTimings, StatusContext, StatusProxy,
};
use prometheus_work_queue::infra::InMemoryJobStore;
use prometheus_work_queue::util::{Clock, ManualClock};

/// Fixed starting instant for every fixture clock.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap()
}

/// Store, manual clock and event sink wired into one context.
pub struct Fixture {
    pub store: Arc<InMemoryJobStore>,
    pub clock: Arc<ManualClock>,
    pub events: InMemoryChangeSink,
    pub ctx: StatusContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_store(store: Arc<InMemoryJobStore>) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let events = InMemoryChangeSink::new(1024);
        let ctx = StatusContext {
            store: store.clone(),
            clock: clock.clone(),
            publisher: ChangePublisher::new(events.clone()),
            timings: ProxyTimings::default(),
        };
        Self {
            store,
            clock,
            events,
            ctx,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a job that became eligible `minutes_ago` minutes before now.
    pub fn insert(&self, request: JobRequest, minutes_ago: i64) -> Job {
        self.insert_with(request, JobStatus::Pending, minutes_ago)
    }

    pub fn insert_with(&self, request: JobRequest, status: JobStatus, minutes_ago: i64) -> Job {
        let now = self.now();
        let mut job = Job::new(request, JobProgress::default(), now);
        job.status = status;
        job.scheduled_time = now - Duration::minutes(minutes_ago);
        job.process_time = job.scheduled_time;
        job.expiration_time = now + Duration::minutes(10);
        job.delete_time = now + Duration::minutes(60);
        let mut session = self.store.begin().unwrap();
        session.insert(job.clone()).unwrap();
        session.commit().unwrap();
        job
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.store.begin().unwrap().get(id).unwrap()
    }

    pub fn status(&self, id: JobId) -> JobStatus {
        self.get(id).map_or(JobStatus::Deleted, |job| job.status)
    }

    pub fn set_status(&self, id: JobId, status: JobStatus) {
        let mut session = self.store.begin().unwrap();
        let mut job = session.get(id).unwrap().unwrap();
        job.status = status;
        session.update(&job).unwrap();
        session.commit().unwrap();
    }

    pub fn all(&self) -> Vec<Job> {
        self.store.begin().unwrap().fetch(&JobFilter::any()).unwrap()
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: StdDuration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(StdDuration::from_millis(5));
    }
    check()
}

/// What a [`ScriptedProcessor`] does when asked to process.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    OutOfResources(String),
    Fail(String),
    Panic(String),
    Refuse,
    /// Run until canceled.
    BlockUntilCanceled,
}

/// Counters shared by all processors created from one factory.
#[derive(Debug, Default)]
pub struct Calls {
    pub processed: AtomicUsize,
    pub deleted: AtomicUsize,
    pub canceled: AtomicUsize,
    pub disposed: AtomicUsize,
    pub concurrent: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Processor whose behavior is picked by the test.
pub struct ScriptedProcessor {
    script: Script,
    calls: Arc<Calls>,
    proxy: Mutex<Option<Arc<StatusProxy>>>,
    cancel: tokio::sync::Notify,
}

impl ScriptedProcessor {
    pub fn new(script: Script, calls: Arc<Calls>) -> Self {
        Self {
            script,
            calls,
            proxy: Mutex::new(None),
            cancel: tokio::sync::Notify::new(),
        }
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    fn initialize(&self, proxy: Arc<StatusProxy>) -> bool {
        *self.proxy.lock() = Some(proxy);
        !matches!(self.script, Script::Refuse)
    }

    async fn process(&self) -> Result<(), ProcessError> {
        let active = self.calls.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.max_concurrent.fetch_max(active, Ordering::SeqCst);
        self.calls.processed.fetch_add(1, Ordering::SeqCst);
        let result = match &self.script {
            Script::Succeed | Script::Refuse => {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
                Ok(())
            }
            Script::OutOfResources(msg) => Err(ProcessError::OutOfResources(msg.clone())),
            Script::Fail(msg) => Err(ProcessError::Failed(msg.clone())),
            Script::Panic(msg) => {
                self.calls.concurrent.fetch_sub(1, Ordering::SeqCst);
                panic!("{msg}");
            }
            Script::BlockUntilCanceled => {
                self.cancel.notified().await;
                Ok(())
            }
        };
        self.calls.concurrent.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn cancel(&self) {
        self.calls.canceled.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    async fn delete(&self) -> Result<(), ProcessError> {
        self.calls.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dispose(&self) {
        self.calls.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
