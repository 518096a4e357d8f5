use std::sync::Arc;

use chrono::Utc;

use crate::job::{Job, JobStatus, JobStore};

/// Output recorded for jobs that failed before the tool produced anything.
pub const OUTPUT_MISSING: &str = "stdout capture is missing";

/// The only place that changes a job's status, explanation and output.
///
/// Every change is written through to the [`JobStore`]. A job that has
/// reached a terminal status is never changed again, so a run reports its
/// outcome exactly once.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn JobStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Move to a non-terminal status. Returns false if the job was already terminal.
    pub async fn transition(&self, job: &mut Job, status: JobStatus) -> bool {
        debug_assert!(!status.is_terminal(), "use succeed/fail/error for terminal states");
        if self.is_finished(job, status) {
            return false;
        }
        job.status = status;
        if status == JobStatus::Running {
            job.started_at = Some(Utc::now());
        }
        tracing::info!(job_id = %job.id, name = %job.name, status = %status, "Job changed status");
        self.persist(job).await;
        true
    }

    /// Record the argument vector and redacted environment of the run.
    pub async fn record_invocation(&self, job: &mut Job, args: Vec<String>, env: Vec<String>) {
        job.args = args;
        job.env = env;
        self.persist(job).await;
    }

    pub async fn succeed(&self, job: &mut Job, output: String) -> bool {
        self.finish(
            job,
            JobStatus::Successful,
            format!("{} completed successfully", job.job_type),
            Some(output),
        )
        .await
    }

    /// Tool-level or job-level failure.
    pub async fn fail(
        &self,
        job: &mut Job,
        explanation: impl Into<String>,
        output: Option<String>,
    ) -> bool {
        self.finish(job, JobStatus::Failed, explanation.into(), output)
            .await
    }

    /// Infrastructure failure on the worker side.
    pub async fn error(
        &self,
        job: &mut Job,
        explanation: impl Into<String>,
        output: Option<String>,
    ) -> bool {
        self.finish(job, JobStatus::Error, explanation.into(), output)
            .await
    }

    async fn finish(
        &self,
        job: &mut Job,
        status: JobStatus,
        explanation: String,
        output: Option<String>,
    ) -> bool {
        if self.is_finished(job, status) {
            return false;
        }
        job.status = status;
        job.explanation = Some(explanation);
        job.output = Some(output.unwrap_or_else(|| OUTPUT_MISSING.to_string()));
        job.finished_at = Some(Utc::now());

        match status {
            JobStatus::Successful => {
                tracing::info!(job_id = %job.id, name = %job.name, "Job successful")
            }
            _ => tracing::warn!(
                job_id = %job.id,
                name = %job.name,
                status = %status,
                explanation = job.explanation.as_deref().unwrap_or_default(),
                "Job did not succeed"
            ),
        }
        self.persist(job).await;
        true
    }

    fn is_finished(&self, job: &Job, requested: JobStatus) -> bool {
        if job.status.is_terminal() {
            tracing::warn!(
                job_id = %job.id,
                current = %job.status,
                requested = %requested,
                "Ignoring status change of finished job"
            );
            return true;
        }
        false
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.put(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job");
        }
    }
}
