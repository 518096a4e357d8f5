//! Job records, their persistence and the status reporter.

pub mod model;
pub mod reporter;
pub mod store;

pub use model::{Job, JobMessage, JobStatus, JobType, SshCredential};
pub use reporter::{StatusReporter, OUTPUT_MISSING};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
