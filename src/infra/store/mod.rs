//! Job store backends.

pub mod file;
pub mod memory;

pub use file::JsonFileJobStore;
pub use memory::InMemoryJobStore;
