use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::SshConfig;
use crate::credentials::Secret;
use crate::error::{Result, WorkerError};
use crate::sandbox::command::new_session;
use crate::sandbox::random_token;

const SOCKET_POLL: Duration = Duration::from_millis(20);

/// Address of a running agent, used to add keys and to populate
/// `SSH_AUTH_SOCK`/`SSH_AGENT_PID`.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    socket: PathBuf,
    pid: u32,
    add_program: String,
}

impl AgentHandle {
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Add a decrypted OpenSSH private key. The key is written to the key
    /// loader's stdin and never touches the filesystem.
    pub async fn add_key(&self, key: &Secret) -> Result<()> {
        let mut child = Command::new(&self.add_program)
            .arg("-")
            .env("SSH_AUTH_SOCK", &self.socket)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Agent(format!("unable to run {}: {}", self.add_program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(key.expose().as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Agent(format!(
                "{} failed ({}): {}",
                self.add_program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Owned agent process. [`AgentProcess::shutdown`] kills it and removes its
/// socket; dropping an un-shut-down process does the same.
#[derive(Debug)]
pub struct AgentProcess {
    child: Option<Child>,
    socket: PathBuf,
}

impl AgentProcess {
    /// Kill the agent and remove the socket. Never waits on the process:
    /// it is reaped on the runtime in the background, or by tokio's orphan
    /// reaper when no runtime is current.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "Unable to signal SSH agent");
        }
        match child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = child.wait().await {
                            tracing::warn!(error = %e, "Unable to reap SSH agent");
                        }
                    });
                }
                Err(_) => drop(child),
            },
            Err(e) => tracing::warn!(error = %e, "Unable to reap SSH agent"),
        }

        if let Err(e) = std::fs::remove_file(&self.socket) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(socket = %self.socket.display(), error = %e, "Unable to remove agent socket");
            }
        }
        tracing::debug!(socket = %self.socket.display(), "SSH agent stopped");
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start an agent in the foreground bound to a fresh socket under `dir` and
/// wait until the socket exists.
pub async fn start(config: &SshConfig, dir: &Path) -> Result<(AgentHandle, AgentProcess)> {
    let socket = dir.join(format!("agent.{}.sock", random_token(8)));

    let mut cmd = Command::new(&config.agent_program);
    cmd.arg("-D")
        .arg("-a")
        .arg(&socket)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    new_session(&mut cmd);

    let child = cmd.spawn().map_err(|e| {
        WorkerError::Agent(format!("unable to start {}: {}", config.agent_program, e))
    })?;
    let pid = child
        .id()
        .ok_or_else(|| WorkerError::Agent("agent exited before reporting a pid".to_string()))?;

    let mut process = AgentProcess {
        child: Some(child),
        socket: socket.clone(),
    };

    let deadline = Instant::now() + config.startup_timeout;
    loop {
        if tokio::fs::try_exists(&socket).await.unwrap_or(false) {
            break;
        }
        if let Some(child) = process.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                process.shutdown();
                return Err(WorkerError::Agent(format!("agent exited early ({})", status)));
            }
        }
        if Instant::now() >= deadline {
            process.shutdown();
            return Err(WorkerError::Agent(format!(
                "agent socket {} did not appear within {:?}",
                socket.display(),
                config.startup_timeout
            )));
        }
        tokio::time::sleep(SOCKET_POLL).await;
    }

    tracing::debug!(pid, socket = %socket.display(), "SSH agent started");
    Ok((
        AgentHandle {
            socket,
            pid,
            add_program: config.add_program.clone(),
        },
        process,
    ))
}
