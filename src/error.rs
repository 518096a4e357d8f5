use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("SSH key error: {0}")]
    Key(#[from] ssh_key::Error),

    #[error("SSH agent error: {0}")]
    Agent(String),

    #[error("Cloud credential error: {0}")]
    CloudCredential(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Variable encoding error: {0}")]
    VarEncoding(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
