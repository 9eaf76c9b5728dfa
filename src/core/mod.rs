//! Core scheduling abstractions: job records, admission, the store contract,
//! processors, the worker pool and the scheduling loop.

pub mod admission;
pub mod error;
pub mod events;
pub mod job;
pub mod processor;
pub mod scheduler;
pub mod status_proxy;
pub mod store;
pub mod worker_pool;

pub use admission::{can_start, Admission, AdmissionSnapshot, WaitReason};
pub use error::{AppResult, SchedulerError};
pub use events::{
    ChangeEvent, ChangeKind, ChangePublisher, ChangeSink, ChannelChangeSink, InMemoryChangeSink,
    NullChangeSink,
};
pub use job::{
    kinds, ConcurrencyClass, Job, JobId, JobProgress, JobRequest, JobStatus, JobSummary, Priority,
    StatusFilter, TimeWindow,
};
pub use processor::{FailureType, ProcessError, Processor, ProcessorFactory, ProcessorRegistry};
pub use scheduler::{admit_batch, AdmissionPass, RecoveryReport, Scheduler, SchedulerSettings};
pub use status_proxy::{ProxyTimings, StatusContext, StatusProxy};
pub use store::{JobFilter, JobSession, JobStore};
pub use worker_pool::{Lane, PoolConfig, PoolStats, SlotCounters, WakeSignal, WorkerPool};
