use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, WorkerError};
use crate::queue::{Delivery, WorkQueue};

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked(Vec<u8>),
    Rejected(Vec<u8>),
}

type Ledger = Arc<Mutex<Vec<Settlement>>>;

/// In-process queue. The stream ends once every [`MemoryPublisher`] is
/// dropped and the backlog is drained.
pub struct MemoryQueue {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ledger: Ledger,
}

/// Sending side of a [`MemoryQueue`], also exposing how deliveries were settled.
#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    ledger: Ledger,
}

impl MemoryQueue {
    pub fn channel() -> (Self, MemoryPublisher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Ledger::default();
        (
            Self {
                rx,
                ledger: ledger.clone(),
            },
            MemoryPublisher { tx, ledger },
        )
    }
}

impl MemoryPublisher {
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.tx
            .send(payload.into())
            .map_err(|_| WorkerError::Queue("memory queue closed".to_string()))
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlement_log().settlements()
    }

    /// View of the settlements that does not keep the queue open.
    pub fn settlement_log(&self) -> SettlementLog {
        SettlementLog {
            ledger: self.ledger.clone(),
        }
    }
}

/// Read-only view of how deliveries were settled.
#[derive(Clone)]
pub struct SettlementLog {
    ledger: Ledger,
}

impl SettlementLog {
    pub fn settlements(&self) -> Vec<Settlement> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        Ok(self.rx.recv().await.map(|payload| {
            Box::new(MemoryDelivery {
                payload,
                ledger: self.ledger.clone(),
            }) as Box<dyn Delivery>
        }))
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    ledger: Ledger,
}

impl MemoryDelivery {
    fn settle(self, settlement: impl FnOnce(Vec<u8>) -> Settlement) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(settlement(self.payload));
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.settle(Settlement::Acked);
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.settle(Settlement::Rejected);
        Ok(())
    }
}
