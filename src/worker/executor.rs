use std::os::unix::process::ExitStatusExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::sandbox::{BuiltCommands, SandboxCommand};

/// How long to wait for output pipes to drain once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Terminal outcome of one sandboxed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    /// Combined stdout and stderr, if any process was started
    pub output: Option<String>,
    pub explanation: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Runs a job's `get` step and then its main command inside the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    tool: String,
    timeout: Duration,
}

impl SandboxExecutor {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            tool: config.sandbox.tool.clone(),
            timeout: config.job_timeout,
        }
    }

    /// Run `get` to completion, then the main command under the timeout.
    /// Never retries.
    pub async fn execute(&self, job_id: Uuid, commands: &BuiltCommands) -> RunResult {
        let started = Instant::now();

        if let Err((output, explanation)) = self.fetch(job_id, &commands.get).await {
            return RunResult {
                success: false,
                output,
                explanation,
                exit_code: None,
                timed_out: false,
                elapsed: started.elapsed(),
            };
        }

        let mut result = self.supervise(job_id, &commands.main).await;
        result.elapsed = started.elapsed();
        tracing::info!(
            job_id = %job_id,
            success = result.success,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Job command finished"
        );
        result
    }

    async fn fetch(
        &self,
        job_id: Uuid,
        get: &SandboxCommand,
    ) -> Result<(), (Option<String>, String)> {
        let failed = format!("{} get failed", self.tool);

        let mut child = get.to_command().spawn().map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Unable to start get command");
            (None, format!("{}: {}", failed, e))
        })?;
        let buffer = Buffer::default();
        let readers = capture(&mut child, &buffer);

        let status = child.wait().await;
        drain(readers).await;
        let output = snapshot(&buffer);

        match status {
            Ok(status) if status.success() => {
                tracing::debug!(job_id = %job_id, "get command finished");
                Ok(())
            }
            Ok(status) => {
                tracing::warn!(job_id = %job_id, status = %status, "get command failed");
                Err((Some(output), failed))
            }
            Err(e) => Err((Some(output), format!("{}: {}", failed, e))),
        }
    }

    async fn supervise(&self, job_id: Uuid, main: &SandboxCommand) -> RunResult {
        let mut result = RunResult {
            success: false,
            output: None,
            explanation: String::new(),
            exit_code: None,
            timed_out: false,
            elapsed: Duration::ZERO,
        };

        let mut child = match main.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job_id, program = %main.program, error = %e, "Unable to start job command");
                result.explanation = format!("unable to start {}: {}", main.program, e);
                return result;
            }
        };
        let pid = child.id();
        tracing::info!(job_id = %job_id, pid = ?pid, "Job command started");

        let buffer = Buffer::default();
        let readers = capture(&mut child, &buffer);

        // Exactly one branch completes; the losing future is dropped, which
        // disarms the timer when the process exits first.
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(self.timeout) => None,
        };

        match exited {
            Some(Ok(status)) => {
                result.exit_code = status.code();
                if status.success() {
                    result.success = true;
                } else {
                    result.explanation = describe(status);
                }
            }
            Some(Err(e)) => {
                result.explanation = format!("wait failed: {}", e);
            }
            None => {
                tracing::warn!(job_id = %job_id, timeout = ?self.timeout, "Job timed out, killing");
                kill_session(pid, &mut child);
                if let Err(e) = child.wait().await {
                    tracing::warn!(job_id = %job_id, error = %e, "Unable to reap killed job");
                }
                result.timed_out = true;
                result.explanation = format!("timed out after {:?}", self.timeout);
            }
        }

        drain(readers).await;
        result.output = Some(snapshot(&buffer));
        result
    }
}

fn describe(status: std::process::ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {}", code),
        (None, Some(signal)) => format!("terminated by signal {}", signal),
        (None, None) => status.to_string(),
    }
}

/// Kill the child's whole process group, falling back to the child alone.
fn kill_session(pid: Option<u32>, child: &mut Child) {
    if let Some(pid) = pid {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => return,
            Err(e) => tracing::warn!(pid, error = %e, "Unable to kill process group"),
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Unable to kill job command");
    }
}

/// Copy stdout and stderr into one shared buffer as they arrive.
fn capture(child: &mut Child, buffer: &Buffer) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, buffer.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, buffer.clone())));
    }
    readers
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, buffer: Buffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            tracing::warn!("Output pipe still open after process exit");
            abort.abort();
        }
    }
}

fn snapshot(buffer: &Buffer) -> String {
    let bytes = buffer.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&bytes).into_owned()
}
