//! Decryption of stored credential blobs.
//!
//! Blobs arrive in the job payload as base64 text of
//! `salt (32) || nonce (12) || ciphertext || tag (16)`. The AES-256-GCM key
//! for each blob is derived from the worker's master key with HKDF-SHA256
//! over the blob's salt.

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::credentials::Secret;
use crate::error::{Result, WorkerError};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const KDF_INFO: &[u8] = b"provision-worker-credentials-v1";

/// Turns a stored, encrypted credential blob into its plaintext.
pub trait CredentialCipher: Send + Sync {
    fn decipher(&self, blob: &str) -> Result<Secret>;
}

pub struct AesGcmCipher {
    master_key: SecretString,
}

impl AesGcmCipher {
    /// The master key must be at least 32 bytes.
    pub fn new(master_key: SecretString) -> Result<Self> {
        if master_key.expose_secret().len() < KEY_SIZE {
            return Err(WorkerError::Credential(
                "master key must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self { master_key })
    }

    /// Encrypt `plaintext` into the blob format accepted by [`decipher`](CredentialCipher::decipher).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut salt = [0u8; SALT_SIZE];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        let cipher = self.cipher_for(&salt)?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| WorkerError::Credential(format!("encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.master_key.expose_secret().as_bytes());
        let mut derived = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut derived)
            .map_err(|_| WorkerError::Credential("key derivation failed".to_string()))?;
        Aes256Gcm::new_from_slice(&derived)
            .map_err(|e| WorkerError::Credential(format!("invalid derived key: {}", e)))
    }
}

impl CredentialCipher for AesGcmCipher {
    fn decipher(&self, blob: &str) -> Result<Secret> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| WorkerError::Credential(format!("credential is not base64: {}", e)))?;
        if raw.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(WorkerError::Credential(
                "encrypted credential too short".to_string(),
            ));
        }

        let (salt, rest) = raw.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher_for(salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| WorkerError::Credential("credential decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| WorkerError::Credential("credential is not valid UTF-8".to_string()))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
