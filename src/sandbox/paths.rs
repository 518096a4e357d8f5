use std::path::{Path, PathBuf};

use crate::config::WorkerConfig;
use crate::sandbox::random_token;

const TOKEN_LEN: usize = 16;
const DIR_MODE: u32 = 0o770;

/// Per-job filesystem allocation.
///
/// Everything except `project_root` is random-token derived and owned by the
/// job: `root` holds the subtrees mapped into the sandbox, `scratch` and
/// `credential` live beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPaths {
    pub root: PathBuf,
    pub etc: PathBuf,
    pub tmp: PathBuf,
    pub var_lib: PathBuf,
    pub var_lib_job_status: PathBuf,
    pub var_lib_projects: PathBuf,
    pub var_log: PathBuf,
    pub scratch: PathBuf,
    pub credential: PathBuf,
    pub project_root: PathBuf,
}

impl SandboxPaths {
    pub fn allocate(config: &WorkerConfig, project_id: &str) -> Self {
        let app = &config.app_name;
        let root = config
            .tmp_root
            .join(format!("{}_proot_{}", app, random_token(TOKEN_LEN)));
        let subtree = || root.join(random_token(TOKEN_LEN));

        Self {
            etc: subtree(),
            tmp: subtree(),
            var_lib: subtree(),
            var_lib_job_status: subtree(),
            var_lib_projects: subtree(),
            var_log: subtree(),
            scratch: config
                .tmp_root
                .join(format!("{}__{}", app, random_token(TOKEN_LEN))),
            credential: config
                .tmp_root
                .join(format!("{}_{}", app, random_token(TOKEN_LEN))),
            project_root: config.project_root(project_id),
            root,
        }
    }

    /// Create every directory of the set. Each creation is independent; a
    /// failure is logged and the rest are still attempted. Returns how many
    /// directories exist afterwards.
    pub async fn create(&self) -> usize {
        let mut created = 0;
        for dir in self.directories() {
            match tokio::fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)
                .await
            {
                Ok(()) => created += 1,
                Err(e) => {
                    tracing::error!(path = %dir.display(), error = %e, "Unable to create directory")
                }
            }
        }
        created
    }

    /// Directories created by [`create`](Self::create).
    pub fn directories(&self) -> [&Path; 8] {
        [
            &self.etc,
            &self.credential,
            &self.tmp,
            &self.scratch,
            &self.var_lib,
            &self.var_lib_job_status,
            &self.var_lib_projects,
            &self.var_log,
        ]
    }

    /// Top-level paths owned by the job; removing these removes everything.
    pub fn owned(&self) -> [&Path; 3] {
        [&self.root, &self.scratch, &self.credential]
    }

    /// Recursively remove every owned path. Individual failures are logged.
    pub fn remove(&self) {
        for path in self.owned() {
            if let Err(e) = std::fs::remove_dir_all(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "Unable to remove directory");
                }
            }
        }
    }
}
