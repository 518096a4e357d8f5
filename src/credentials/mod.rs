//! Credential handling: the [`Secret`] wrapper, decryption of stored blobs
//! and cloud-provider credential files.

pub mod cipher;
pub mod cloud;
pub mod secret;

pub use cipher::{AesGcmCipher, CredentialCipher};
pub use cloud::{CloudCredential, CloudEnv};
pub use secret::{Secret, MASK_CHAR};
