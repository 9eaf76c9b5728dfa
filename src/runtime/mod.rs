//! Host-facing runtime: the running engine, job intake and API models.

pub mod api;
pub mod engine;
pub mod intake;

pub use api::{CancelOutcome, Health, JobStatusResponse, JobUpdate, Submission};
pub use engine::Engine;
pub use intake::{IntakeSettings, JobIntake};
