use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::job::{JobMessage, JobStatus};
use crate::queue::{Delivery, WorkQueue};
use crate::worker::runner::JobRunner;

/// Pulls one delivery at a time and drives it to a terminal status before
/// settling it.
pub struct Consumer {
    queue: Box<dyn WorkQueue>,
    runner: JobRunner,
    shutdown: CancellationToken,
}

impl Consumer {
    pub fn new(queue: Box<dyn WorkQueue>, runner: JobRunner, shutdown: CancellationToken) -> Self {
        Self {
            queue,
            runner,
            shutdown,
        }
    }

    /// Consume until the queue closes or shutdown is requested. Shutdown is
    /// only observed between jobs. Returns the number of deliveries handled.
    pub async fn run(mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, consumer stopping");
                    break;
                }
                next = self.queue.next() => next?,
            };
            let Some(delivery) = delivery else {
                tracing::warn!("Work queue closed");
                break;
            };
            self.handle(delivery).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle(&self, delivery: Box<dyn Delivery>) -> Result<()> {
        let message = match JobMessage::decode(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Unable to decode job payload");
                let salvaged = JobMessage::salvage_id(delivery.payload());
                delivery.reject().await?;
                if let Some(id) = salvaged {
                    self.fail_undecodable(id, &e.to_string()).await;
                }
                return Ok(());
            }
        };

        let mut message = message;
        tracing::info!(job_id = %message.job.id, name = %message.job.name, job_type = %message.job.job_type, "Job received");
        // Whatever status the publisher sent is stale; this worker owns it now
        message.job.status = JobStatus::Pending;
        message.job.explanation = None;
        message.job.output = None;
        message.job.finished_at = None;
        self.runner
            .reporter()
            .transition(&mut message.job, JobStatus::Pending)
            .await;

        let job = self.runner.run(&message).await;
        tracing::info!(job_id = %job.id, status = %job.status, "Job finished");
        delivery.ack().await
    }

    async fn fail_undecodable(&self, id: uuid::Uuid, reason: &str) {
        match self.runner.store().get(&id).await {
            Ok(mut job) => {
                self.runner
                    .reporter()
                    .fail(&mut job, format!("unable to decode job: {}", reason), None)
                    .await;
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Undecodable job has no stored record");
            }
        }
    }
}
