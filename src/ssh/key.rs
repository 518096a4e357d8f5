use ssh_key::{LineEnding, PrivateKey};

use crate::credentials::{CredentialCipher, Secret};
use crate::error::{Result, WorkerError};
use crate::job::SshCredential;

/// Decrypt a stored credential into the OpenSSH PEM documents to hand to
/// the agent, in load order.
///
/// With a passphrase the key is unlocked with it and added. Independently
/// the key is also added as stored, which only succeeds when it is not
/// passphrase-protected; a protected key that the passphrase attempt
/// already unlocked is skipped rather than reported.
///
/// An empty key or passphrase counts as absent; an empty key yields no
/// documents at all.
pub fn prepare(cipher: &dyn CredentialCipher, credential: &SshCredential) -> Result<Vec<Secret>> {
    if credential.key.is_empty() {
        return Ok(Vec::new());
    }
    let pem = cipher.decipher(&credential.key)?;
    let parsed = PrivateKey::from_openssh(pem.expose())?;
    let mut keys = Vec::with_capacity(2);

    let passphrase = credential.passphrase.as_deref().filter(|p| !p.is_empty());
    if let Some(blob) = passphrase {
        let passphrase = cipher.decipher(blob)?;
        let unlocked = if parsed.is_encrypted() {
            parsed.decrypt(passphrase.expose())?
        } else {
            parsed.clone()
        };
        keys.push(to_pem(&unlocked)?);
    }

    if !parsed.is_encrypted() {
        keys.push(to_pem(&parsed)?);
    } else if keys.is_empty() {
        return Err(WorkerError::Credential(
            "SSH key is passphrase-protected and no passphrase was supplied".to_string(),
        ));
    }

    Ok(keys)
}

fn to_pem(key: &PrivateKey) -> Result<Secret> {
    let pem = key.to_openssh(LineEnding::LF)?;
    Ok(Secret::new(pem.as_str()))
}
