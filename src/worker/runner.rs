use std::sync::Arc;

use futures_util::FutureExt;

use crate::config::WorkerConfig;
use crate::credentials::CredentialCipher;
use crate::job::{Job, JobMessage, JobStatus, JobStore, StatusReporter};
use crate::sandbox::{CommandBuilder, SandboxPaths};
use crate::ssh;
use crate::worker::cleanup::CleanupStack;
use crate::worker::executor::SandboxExecutor;
use crate::worker::wait::{Clock, DependencyWait, TokioClock, WaitOutcome};

/// Drives one job from dependency wait to a terminal status.
///
/// Resources acquired along the way (sandbox paths, SSH agent, cloud
/// credential file) are registered on a [`CleanupStack`] and released in
/// reverse order on every exit path.
#[derive(Clone)]
pub struct JobRunner {
    config: Arc<WorkerConfig>,
    store: Arc<dyn JobStore>,
    reporter: StatusReporter,
    cipher: Arc<dyn CredentialCipher>,
    clock: Arc<dyn Clock>,
    executor: SandboxExecutor,
}

impl JobRunner {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn JobStore>,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        let executor = SandboxExecutor::new(&config);
        Self {
            reporter: StatusReporter::new(store.clone()),
            config,
            store,
            cipher,
            clock: Arc::new(TokioClock),
            executor,
        }
    }

    /// Replace the clock used for dependency polling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    /// Run `message` to completion and return the final job record, which
    /// is always in a terminal status.
    pub async fn run(&self, message: &JobMessage) -> Job {
        let mut job = message.job.clone();

        let outcome = std::panic::AssertUnwindSafe(self.drive(&mut job, message))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(job_id = %job.id, reason = %reason, "Job run panicked");
            self.reporter
                .error(&mut job, format!("worker panicked: {}", reason), None)
                .await;
        }

        if !job.status.is_terminal() {
            self.reporter
                .error(&mut job, "run ended without an outcome", None)
                .await;
        }
        job
    }

    async fn drive(&self, job: &mut Job, message: &JobMessage) {
        if message.previous_job.is_some() {
            self.reporter.transition(job, JobStatus::Waiting).await;
        }
        let wait = DependencyWait::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.dependency_poll_interval,
        );
        if let WaitOutcome::Blocked { explanation } = wait.wait(job.id, message.previous_job).await {
            self.reporter.fail(job, explanation, None).await;
            return;
        }

        let mut cleanup = CleanupStack::new();
        self.provision_and_execute(job, message, &mut cleanup).await;
        cleanup.release_all();
    }

    async fn provision_and_execute(
        &self,
        job: &mut Job,
        message: &JobMessage,
        cleanup: &mut CleanupStack,
    ) {
        let paths = SandboxPaths::allocate(&self.config, &job.project_id);
        let owned = paths.clone();
        cleanup.push("sandbox paths", move || owned.remove());
        let created = paths.create().await;
        tracing::debug!(job_id = %job.id, created, root = %paths.root.display(), "Sandbox paths allocated");

        let (agent, mut agent_process) = match ssh::agent::start(&self.config.ssh, &paths.credential).await {
            Ok(started) => started,
            Err(e) => {
                self.reporter.error(job, e.to_string(), None).await;
                return;
            }
        };
        cleanup.push("ssh agent", move || agent_process.shutdown());

        if let Err(e) = ssh::load_credentials(
            &agent,
            self.cipher.as_ref(),
            message.machine.as_ref(),
            message.network.as_ref(),
        )
        .await
        {
            self.reporter.fail(job, e.to_string(), None).await;
            return;
        }

        let builder = CommandBuilder::new(&self.config, self.cipher.as_ref());
        let commands = match builder
            .build(message, &paths, agent.socket(), agent.pid(), cleanup)
            .await
        {
            Ok(commands) => commands,
            Err(e) => {
                self.reporter.fail(job, e.to_string(), None).await;
                return;
            }
        };

        self.reporter
            .record_invocation(job, commands.main.args.clone(), commands.redacted_env())
            .await;
        self.reporter.transition(job, JobStatus::Running).await;

        let result = self.executor.execute(job.id, &commands).await;
        if result.success {
            self.reporter
                .succeed(job, result.output.unwrap_or_default())
                .await;
        } else {
            self.reporter
                .fail(job, result.explanation, result.output)
                .await;
        }
    }
}
