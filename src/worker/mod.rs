//! Job execution pipeline.
//!
//! - [`Consumer`]: pulls deliveries from the work queue, one at a time
//! - [`JobRunner`]: dependency wait, sandbox setup, SSH agent, command
//!   building and execution for a single job
//! - [`SandboxExecutor`]: runs the `get` step and the main command under a
//!   timeout
//! - [`CleanupStack`]: releases per-job resources in reverse order
//!
//! # Execution Flow
//!
//! 1. [`Consumer`] decodes a delivery and marks the job `pending`
//! 2. [`DependencyWait`] blocks on the predecessor, if any
//! 3. [`JobRunner`] allocates paths, starts the agent, loads keys and builds
//!    the commands, registering each resource on the cleanup stack
//! 4. [`SandboxExecutor::execute`] produces a [`RunResult`]
//! 5. The status reporter records the terminal status, the stack is
//!    released and the delivery acknowledged

pub mod cleanup;
pub mod consumer;
pub mod executor;
pub mod runner;
pub mod wait;

pub use cleanup::CleanupStack;
pub use consumer::Consumer;
pub use executor::{RunResult, SandboxExecutor};
pub use runner::JobRunner;
pub use wait::{Clock, DependencyWait, TokioClock, WaitOutcome};
