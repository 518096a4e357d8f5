use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::job::{Job, JobStatus, JobStore, JobType};

/// Source of delays for polling loops.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No predecessor, or the predecessor succeeded.
    Ready,
    /// The predecessor ended in `failed` or `error`.
    Blocked { explanation: String },
}

#[derive(Serialize)]
struct PredecessorRef<'a> {
    job_type: JobType,
    job_name: &'a str,
    job_id: Uuid,
}

/// Polls a predecessor job until it reaches a terminal status.
pub struct DependencyWait<'a> {
    store: &'a dyn JobStore,
    clock: &'a dyn Clock,
    interval: Duration,
}

impl<'a> DependencyWait<'a> {
    pub fn new(store: &'a dyn JobStore, clock: &'a dyn Clock, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Block until `predecessor` is terminal. There is no overall timeout;
    /// lookup errors are retried on the next tick.
    pub async fn wait(&self, job_id: Uuid, predecessor: Option<Uuid>) -> WaitOutcome {
        let Some(predecessor) = predecessor else {
            return WaitOutcome::Ready;
        };

        tracing::info!(job_id = %job_id, predecessor = %predecessor, "Waiting for previous job");
        loop {
            self.clock.sleep(self.interval).await;

            let previous = match self.store.get(&predecessor).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, predecessor = %predecessor, error = %e, "Previous job lookup failed");
                    continue;
                }
            };

            match previous.status {
                JobStatus::Successful => {
                    tracing::info!(job_id = %job_id, predecessor = %predecessor, "Previous job succeeded");
                    return WaitOutcome::Ready;
                }
                JobStatus::Failed | JobStatus::Error => {
                    return WaitOutcome::Blocked {
                        explanation: blocked_explanation(&previous),
                    };
                }
                JobStatus::Pending | JobStatus::Waiting | JobStatus::Running => {}
            }
        }
    }
}

fn blocked_explanation(previous: &Job) -> String {
    let reference = PredecessorRef {
        job_type: previous.job_type,
        job_name: &previous.name,
        job_id: previous.id,
    };
    let json = serde_json::to_string(&reference).unwrap_or_else(|_| previous.id.to_string());
    format!("Previous Task Failed: {}", json)
}
