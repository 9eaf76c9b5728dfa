//! Configuration models for the engine, its worker pool and the scheduling loop.

pub mod engine;

pub use crate::core::scheduler::SchedulerSettings;
pub use crate::core::worker_pool::PoolConfig;
pub use engine::{EngineConfig, ENV_PREFIX};
