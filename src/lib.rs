//! # Prometheus Work Queue
//!
//! A work-item scheduling and concurrency-admission engine for background jobs
//! that operate on shared entities (studies).
//!
//! Jobs are persisted in a [`JobStore`](core::JobStore). A single scheduling
//! loop repeatedly asks the store for eligible jobs, decides which of them may
//! start without conflicting with work already running, and hands the winners
//! to a worker pool with a reserved "stat" lane for time-critical jobs.
//!
//! ## Admission in one paragraph
//!
//! Every job carries a priority (`Normal < High < Stat`), a concurrency class
//! and an optional scope. A candidate waits when something more important is
//! already running or waiting in an `Exclusive` class, when a job on the same
//! scope holds an incompatible class, or when its kind reached its configured
//! running limit. A job that must wait becomes `Idle` with a reason such as
//! `"Waiting for: Process study"` and is retried on a later cycle. Within one
//! cycle every admitted job counts as running for the checks that follow it.
//!
//! ## Key Features
//!
//! - **Scope-aware admission**: compatibility matrix over six concurrency classes
//! - **Reserved capacity**: stat work may borrow normal slots, never the reverse
//! - **Crash recovery**: interrupted jobs are repaired on every start
//! - **Deletion sweep**: finished jobs are purged after a retention delay
//! - **Change notifications**: every committed change is published to a sink
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_work_queue::builders::EngineBuilder;
//! use prometheus_work_queue::config::EngineConfig;
//! use prometheus_work_queue::core::{kinds, JobRequest};
//!
//! let engine = EngineBuilder::new()
//!     .with_config(EngineConfig::from_env()?)
//!     .with_processor(kinds::DICOM_SEND, || SendProcessor::default())
//!     .build()?;
//! engine.start()?;
//!
//! let submitted = engine.intake().submit(JobRequest::send_study("1.2.840.1"))?;
//! println!("queued {}", submitted.job.id);
//! ```
//!
//! For complete scenarios, see `tests/scheduling_test.rs` and `tests/engine_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, admission and the scheduling loop.
pub mod core;
/// Engine configuration and its conversions.
pub mod config;
/// Builders to construct an engine from configuration.
pub mod builders;
/// Infrastructure adapters for job storage.
pub mod infra;
/// Host-facing engine, intake and API models.
pub mod runtime;
/// Shared utilities.
pub mod util;
