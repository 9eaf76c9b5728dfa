//! Infrastructure adapters for job storage.

pub mod store;

pub use store::{InMemoryJobStore, JsonFileJobStore};
