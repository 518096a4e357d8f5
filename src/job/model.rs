use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::{CloudCredential, Secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Apply,
    Plan,
    Destroy,
    DestroyPlan,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Apply => write!(f, "apply"),
            JobType::Plan => write!(f, "plan"),
            JobType::Destroy => write!(f, "destroy"),
            JobType::DestroyPlan => write!(f, "destroy_plan"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Waiting,
    Running,
    Successful,
    Failed,
    Error,
}

impl JobStatus {
    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Successful => write!(f, "successful"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// A provisioning job, as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub job_type: JobType,
    pub project_id: String,
    /// Directory inside the project checkout handed to the tool
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
    /// Resource address for `destroy`
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub update_on_launch: bool,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    /// Argument vector of the main invocation
    #[serde(default)]
    pub args: Vec<String>,
    /// Redacted environment of the main invocation
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

fn default_status() -> JobStatus {
    JobStatus::Pending
}

impl Job {
    pub fn new(name: impl Into<String>, job_type: JobType, project_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            job_type,
            project_id: project_id.into(),
            directory: None,
            vars: BTreeMap::new(),
            target: None,
            update_on_launch: false,
            status: JobStatus::Pending,
            explanation: None,
            output: None,
            args: Vec::new(),
            env: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Directory argument, if one is set and non-empty.
    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref().filter(|d| !d.is_empty())
    }
}

/// Encrypted SSH key and optional encrypted passphrase.
#[derive(Debug, Clone, Deserialize)]
pub struct SshCredential {
    pub key: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Inbound queue payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JobMessage {
    pub job: Job,
    /// API token exported to the job as `REST_API_TOKEN`
    pub token: Secret,
    /// Job whose success gates this one
    #[serde(default)]
    pub previous_job: Option<Uuid>,
    #[serde(default)]
    pub machine: Option<SshCredential>,
    #[serde(default)]
    pub network: Option<SshCredential>,
    #[serde(default)]
    pub cloud: Option<CloudCredential>,
}

impl JobMessage {
    pub fn decode(payload: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Best-effort recovery of the job id from a payload that failed to decode.
    pub fn salvage_id(payload: &[u8]) -> Option<Uuid> {
        let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
        value.get("job")?.get("id")?.as_str()?.parse().ok()
    }
}
