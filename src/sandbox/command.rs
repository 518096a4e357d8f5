use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::credentials::{cloud, CredentialCipher};
use crate::error::{Result, WorkerError};
use crate::job::{Job, JobMessage, JobType};
use crate::sandbox::{varfile, SandboxEnv, SandboxPaths};
use crate::worker::CleanupStack;

/// A fully specified sandboxed invocation.
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: SandboxEnv,
}

impl SandboxCommand {
    /// Process builder for this invocation: clean environment, stdin closed,
    /// stdout and stderr piped, started in a new session.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .env_clear()
            .envs(self.env.execution())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        new_session(&mut cmd);
        cmd
    }
}

/// Make the child a session leader with no controlling terminal, so it can
/// never block on an interactive prompt and its process group can be killed
/// as a unit.
pub fn new_session(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

/// Output of [`CommandBuilder::build`].
#[derive(Debug)]
pub struct BuiltCommands {
    /// Main provisioning invocation
    pub main: SandboxCommand,
    /// Dependency fetch (`get`) run before `main`
    pub get: SandboxCommand,
    /// Written variable file, if the job declared variables
    pub var_file: Option<PathBuf>,
    /// Cloud credential file, if the job carried a cloud credential
    pub cloud_file: Option<PathBuf>,
}

impl BuiltCommands {
    /// Environment safe to log and persist.
    pub fn redacted_env(&self) -> Vec<String> {
        self.main.env.redacted()
    }
}

/// Builds sandboxed command lines for a job.
pub struct CommandBuilder<'a> {
    config: &'a WorkerConfig,
    cipher: &'a dyn CredentialCipher,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a WorkerConfig, cipher: &'a dyn CredentialCipher) -> Self {
        Self { config, cipher }
    }

    /// Sandbox prefix: root, bind mounts and working directory.
    pub fn bind_args(&self, paths: &SandboxPaths) -> Vec<String> {
        let app = &self.config.app_name;
        let projects_home = self.config.projects_home.display();
        let state_dir = self.config.state_dir.display();
        let project_root = paths.project_root.display();
        let scratch = paths.scratch.display();

        let mounts = [
            format!("{}:/etc/{}", paths.etc.display(), app),
            format!("{}:/tmp", paths.tmp.display()),
            format!("{}:/var/lib/{}", paths.var_lib.display(), app),
            format!("{}:{}", paths.var_lib_projects.display(), projects_home),
            format!("{}:/var/log", paths.var_log.display()),
            format!("{}:{}", scratch, scratch),
            format!("{}:{}", project_root, project_root),
            format!("{}:{}", state_dir, state_dir),
        ];

        let mut args: Vec<String> = ["-v", "0", "-r", "/"].iter().map(|s| s.to_string()).collect();
        for mount in mounts {
            args.push("-b".to_string());
            args.push(mount);
        }
        args.push("-w".to_string());
        args.push(project_root.to_string());
        args
    }

    /// Tool invocation for the job's type, writing the variable file when
    /// the type takes one. Returns the arguments and the variable file.
    pub async fn tool_args(
        &self,
        job: &Job,
        paths: &SandboxPaths,
    ) -> Result<(Vec<String>, Option<PathBuf>)> {
        let mut args = vec![self.config.sandbox.tool.clone()];

        match job.job_type {
            JobType::Destroy => {
                let target = job.target.as_deref().filter(|t| !t.is_empty()).ok_or_else(|| {
                    WorkerError::Command("destroy job requires a target".to_string())
                })?;
                args.extend(["destroy", "-force", "-target", target].map(String::from));
                args.extend(job.directory().map(String::from));
                return Ok((args, None));
            }
            JobType::DestroyPlan => {
                args.extend(["plan", "-destroy"].map(String::from));
                args.extend(job.directory().map(String::from));
                return Ok((args, None));
            }
            JobType::Apply => args.extend(["apply", "-input=false"].map(String::from)),
            JobType::Plan => args.extend(["plan", "-input=false"].map(String::from)),
        }

        let mut var_file = None;
        if !job.vars.is_empty() {
            let path = varfile::write_var_file(&paths.scratch, &job.vars).await?;
            args.push(format!("-var-file={}", path.display()));
            var_file = Some(path);
        }
        args.extend(job.directory().map(String::from));
        Ok((args, var_file))
    }

    /// Environment shared by both invocations.
    pub fn environment(
        &self,
        msg: &JobMessage,
        paths: &SandboxPaths,
        agent_socket: &Path,
        agent_pid: u32,
    ) -> SandboxEnv {
        let project_root = paths.project_root.display().to_string();
        let mut env = SandboxEnv::new();
        env.set("PROJECT_PATH", project_root.clone())
            .set("HOME_PATH", self.config.projects_home.display().to_string())
            .set("PWD", project_root)
            .set("SHLVL", "0")
            .set("HOME", self.config.home.display().to_string())
            .set("_", self.config.sandbox.invocation_marker.clone())
            .set("PROOT_NO_SECCOMP", "1")
            .set("PATH", self.config.sandbox.search_path.clone())
            .set_secret("REST_API_TOKEN", msg.token.clone())
            .set("JOB_ID", msg.job.id.to_string())
            .set("REST_API_URL", self.config.api_url.clone())
            .set("SSH_AUTH_SOCK", agent_socket.display().to_string())
            .set("SSH_AGENT_PID", agent_pid.to_string());
        env
    }

    /// Build the `get` and main invocations. Files written here are
    /// registered on `cleanup`.
    pub async fn build(
        &self,
        msg: &JobMessage,
        paths: &SandboxPaths,
        agent_socket: &Path,
        agent_pid: u32,
        cleanup: &mut CleanupStack,
    ) -> Result<BuiltCommands> {
        let job = &msg.job;
        let prefix = self.bind_args(paths);
        let (tool_args, var_file) = self.tool_args(job, paths).await?;
        let mut env = self.environment(msg, paths, agent_socket, agent_pid);

        let mut cloud_file = None;
        if let Some(credential) = &msg.cloud {
            let cloud_env = cloud::materialize(credential, self.cipher, &paths.credential).await?;
            env.extend(cloud_env.vars);
            let file = cloud_env.file.clone();
            cleanup.push("cloud credential", move || remove_file(&file));
            cloud_file = Some(cloud_env.file);
        }

        let main = SandboxCommand {
            program: self.config.sandbox.program.clone(),
            args: prefix.iter().cloned().chain(tool_args).collect(),
            dir: paths.project_root.clone(),
            env,
        };

        let mut get_args = prefix;
        get_args.push(self.config.sandbox.tool.clone());
        get_args.push("get".to_string());
        if job.update_on_launch {
            get_args.push("-update".to_string());
        }
        get_args.extend(job.directory().map(String::from));
        let get = SandboxCommand {
            program: main.program.clone(),
            args: get_args,
            dir: main.dir.clone(),
            env: main.env.clone(),
        };

        tracing::info!(job_id = %job.id, args = ?main.args, "Job arguments");
        tracing::debug!(
            job_id = %job.id,
            dir = %main.dir.display(),
            environment = ?main.env.redacted(),
            "Job directory and environment"
        );

        Ok(BuiltCommands {
            main,
            get,
            var_file,
            cloud_file,
        })
    }
}

fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!(path = %path.display(), error = %e, "Unable to remove cloud credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AesGcmCipher, CloudCredential, Secret};
    use secrecy::SecretString;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: WorkerConfig,
        cipher: AesGcmCipher,
        paths: SandboxPaths,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig::rooted_at(dir.path());
        let paths = SandboxPaths::allocate(&config, "proj-1");
        paths.create().await;
        let cipher = AesGcmCipher::new(SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))
        .unwrap();
        Fixture {
            _dir: dir,
            config,
            cipher,
            paths,
        }
    }

    fn message(job: Job) -> JobMessage {
        JobMessage {
            job,
            token: Secret::new("tok-abcdef"),
            previous_job: None,
            machine: None,
            network: None,
            cloud: None,
        }
    }

    async fn build(f: &Fixture, msg: &JobMessage) -> (BuiltCommands, CleanupStack) {
        let mut cleanup = CleanupStack::new();
        let builder = CommandBuilder::new(&f.config, &f.cipher);
        let built = builder
            .build(msg, &f.paths, Path::new("/tmp/agent.sock"), 4242, &mut cleanup)
            .await
            .unwrap();
        (built, cleanup)
    }

    fn tail(args: &[String], n: usize) -> Vec<&str> {
        args[args.len() - n..].iter().map(|s| s.as_str()).collect()
    }

    #[tokio::test]
    async fn destroy_ends_with_target_and_writes_no_var_file() {
        let f = fixture().await;
        let mut job = Job::new("teardown", JobType::Destroy, "proj-1");
        job.target = Some("web-1".to_string());
        job.vars.insert("ignored".to_string(), serde_json::json!(1));

        let (built, _cleanup) = build(&f, &message(job)).await;

        assert_eq!(
            tail(&built.main.args, 5),
            vec!["terraform", "destroy", "-force", "-target", "web-1"]
        );
        assert!(built.var_file.is_none());
        assert_eq!(std::fs::read_dir(&f.paths.scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn destroy_without_target_is_an_error() {
        let f = fixture().await;
        let job = Job::new("teardown", JobType::Destroy, "proj-1");
        let builder = CommandBuilder::new(&f.config, &f.cipher);
        assert!(builder.tool_args(&job, &f.paths).await.is_err());
    }

    #[tokio::test]
    async fn apply_with_vars_and_directory() {
        let f = fixture().await;
        let mut job = Job::new("net", JobType::Apply, "proj-1");
        job.directory = Some("infra/net".to_string());
        job.vars.insert("region".to_string(), serde_json::json!("eu-west-1"));

        let (built, _cleanup) = build(&f, &message(job)).await;

        let var_file = built.var_file.clone().unwrap();
        assert!(var_file.starts_with(&f.paths.scratch));
        assert_eq!(
            std::fs::read_to_string(&var_file).unwrap(),
            "region = \"eu-west-1\"\n"
        );
        let var_arg = format!("-var-file={}", var_file.display());
        assert_eq!(
            tail(&built.main.args, 4),
            vec!["apply", "-input=false", var_arg.as_str(), "infra/net"]
        );
    }

    #[tokio::test]
    async fn plan_and_destroy_plan_shapes() {
        let f = fixture().await;
        let (built, _c) = build(&f, &message(Job::new("p", JobType::Plan, "proj-1"))).await;
        assert_eq!(tail(&built.main.args, 3), vec!["terraform", "plan", "-input=false"]);

        let mut job = Job::new("dp", JobType::DestroyPlan, "proj-1");
        job.directory = Some("infra".to_string());
        let (built, _c) = build(&f, &message(job)).await;
        assert_eq!(
            tail(&built.main.args, 4),
            vec!["terraform", "plan", "-destroy", "infra"]
        );
    }

    #[tokio::test]
    async fn bind_mounts_and_working_directory() {
        let f = fixture().await;
        let builder = CommandBuilder::new(&f.config, &f.cipher);
        let args = builder.bind_args(&f.paths);

        assert_eq!(&args[..4], &["-v", "0", "-r", "/"]);
        let mounts: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-b")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(mounts.len(), 8);
        assert_eq!(mounts[0], format!("{}:/etc/provision", f.paths.etc.display()));
        assert_eq!(mounts[1], format!("{}:/tmp", f.paths.tmp.display()));
        assert_eq!(mounts[4], format!("{}:/var/log", f.paths.var_log.display()));
        let root = f.paths.project_root.display().to_string();
        assert_eq!(&args[args.len() - 2..], &["-w".to_string(), root]);
    }

    #[tokio::test]
    async fn get_command_shares_prefix_and_env() {
        let f = fixture().await;
        let mut job = Job::new("net", JobType::Apply, "proj-1");
        job.update_on_launch = true;
        job.directory = Some("infra".to_string());

        let (built, _c) = build(&f, &message(job)).await;

        assert_eq!(
            tail(&built.get.args, 4),
            vec!["terraform", "get", "-update", "infra"]
        );
        let prefix_len = built.get.args.len() - 4;
        assert_eq!(&built.get.args[..prefix_len], &built.main.args[..prefix_len]);
        assert_eq!(built.get.dir, built.main.dir);
        assert_eq!(built.get.env.redacted(), built.main.env.redacted());
        assert_eq!(built.main.program, "proot");
    }

    #[tokio::test]
    async fn redacted_env_masks_only_the_token() {
        let f = fixture().await;
        let msg = message(Job::new("net", JobType::Plan, "proj-1"));
        let (built, _c) = build(&f, &msg).await;

        let redacted = built.redacted_env();
        let execution: Vec<String> = built
            .main
            .env
            .execution()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        assert_eq!(redacted.len(), 13);
        assert_eq!(redacted.len(), execution.len());
        for (r, e) in redacted.iter().zip(&execution) {
            if e.starts_with("REST_API_TOKEN=") {
                assert_eq!(e, "REST_API_TOKEN=tok-abcdef");
                assert_eq!(r, "REST_API_TOKEN=**********");
                assert_eq!(r.len(), e.len());
            } else {
                assert_eq!(r, e);
            }
        }
        assert!(execution.contains(&"SSH_AUTH_SOCK=/tmp/agent.sock".to_string()));
        assert!(execution.contains(&"SSH_AGENT_PID=4242".to_string()));
        assert!(execution.contains(&format!("JOB_ID={}", msg.job.id)));
    }

    #[tokio::test]
    async fn cloud_credential_joins_env_and_cleanup() {
        let f = fixture().await;
        let mut msg = message(Job::new("net", JobType::Plan, "proj-1"));
        msg.cloud = Some(CloudCredential::Aws {
            access_key: f.cipher.encrypt("AKIA").unwrap(),
            secret_key: f.cipher.encrypt("SECRET").unwrap(),
            security_token: None,
            region: None,
        });

        let (built, mut cleanup) = build(&f, &msg).await;

        let file = built.cloud_file.clone().unwrap();
        assert!(file.starts_with(&f.paths.credential));
        assert!(built
            .redacted_env()
            .contains(&format!("AWS_SHARED_CREDENTIALS_FILE={}", file.display())));
        assert!(built.redacted_env().iter().all(|e| !e.contains("SECRET")));

        assert_eq!(cleanup.len(), 1);
        cleanup.release_all();
        assert!(!file.exists());
    }
}
