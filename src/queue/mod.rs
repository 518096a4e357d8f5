//! Work queue transport.
//!
//! The consumer only sees [`WorkQueue`] and [`Delivery`]; [`AmqpQueue`] talks
//! to the broker and [`MemoryQueue`] backs the tests.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use amqp::AmqpQueue;
pub use memory::{MemoryPublisher, MemoryQueue, Settlement, SettlementLog};

/// Source of job deliveries, at most one unacknowledged at a time.
#[async_trait]
pub trait WorkQueue: Send {
    /// Wait for the next delivery. `None` means the queue closed.
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>>;
}

/// A delivery that must be settled exactly once.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Acknowledge; the message is gone from the queue.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Reject without requeue.
    async fn reject(self: Box<Self>) -> Result<()>;
}
