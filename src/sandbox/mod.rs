//! Sandbox construction: per-job paths, the variable file, the process
//! environment and the sandboxed command lines.

pub mod command;
pub mod env;
pub mod paths;
pub mod varfile;

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::AsyncWriteExt;

pub use command::{BuiltCommands, CommandBuilder, SandboxCommand};
pub use env::{EnvValue, SandboxEnv};
pub use paths::SandboxPaths;

/// Random alphanumeric token of `len` characters.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Create `path` (which must not exist) with mode 0600 and write `contents`.
pub(crate) async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_shape() {
        let token = random_token(16);
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_token(16), token);
    }
}
