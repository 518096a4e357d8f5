//! Per-job SSH agent: start, key loading and teardown.

pub mod agent;
pub mod key;

pub use agent::{AgentHandle, AgentProcess};

use crate::credentials::CredentialCipher;
use crate::error::Result;
use crate::job::SshCredential;

/// Load the machine credential and then the network credential into the
/// agent. Stops at the first failure.
pub async fn load_credentials(
    agent: &AgentHandle,
    cipher: &dyn CredentialCipher,
    machine: Option<&SshCredential>,
    network: Option<&SshCredential>,
) -> Result<usize> {
    let mut loaded = 0;
    for (label, credential) in [("machine", machine), ("network", network)] {
        let Some(credential) = credential.filter(|c| !c.key.is_empty()) else {
            continue;
        };
        for pem in key::prepare(cipher, credential)? {
            agent.add_key(&pem).await?;
            loaded += 1;
        }
        tracing::debug!(credential = label, "SSH credential loaded");
    }
    Ok(loaded)
}
