use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::job::Job;

/// Keyed persistence for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &Uuid) -> Result<Job>;
    async fn put(&self, job: &Job) -> Result<()>;
}

/// In-process store, used by tests and single-node setups.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(WorkerError::JobNotFound(*id))
    }

    async fn put(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }
}

/// One JSON document per job under a directory. Writes go through a
/// temporary file and a rename so readers never see a partial record.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, id: &Uuid) -> Result<Job> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkerError::JobNotFound(*id))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| WorkerError::Store(format!("corrupt record for job {}: {}", id, e)))
    }

    async fn put(&self, job: &Job) -> Result<()> {
        let path = self.path_for(&job.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", job.id));
        let bytes = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
