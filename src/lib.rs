pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod queue;
pub mod sandbox;
pub mod shutdown;
pub mod ssh;
pub mod worker;
