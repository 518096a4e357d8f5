//! Cloud-provider credential materialisation.
//!
//! A cloud credential is written to a single owner-only file inside the
//! job's credential path; the sandboxed tool finds it through environment
//! variables pointing at that file. The file is removed with the rest of the
//! job's resources.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::credentials::CredentialCipher;
use crate::error::{Result, WorkerError};
use crate::sandbox::{random_token, write_private};

/// Cloud credential as carried in the job payload. Secret fields hold
/// encrypted blobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloudCredential {
    Aws {
        access_key: String,
        secret_key: String,
        #[serde(default)]
        security_token: Option<String>,
        #[serde(default)]
        region: Option<String>,
    },
    Gce {
        client_email: String,
        project: String,
        private_key: String,
    },
    Azure {
        subscription: String,
        tenant: String,
        client_id: String,
        secret: String,
    },
}

impl CloudCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            CloudCredential::Aws { .. } => "aws",
            CloudCredential::Gce { .. } => "gce",
            CloudCredential::Azure { .. } => "azure",
        }
    }
}

/// Result of materialising a cloud credential.
#[derive(Debug)]
pub struct CloudEnv {
    /// Variables to add to the execution environment. None of them carry
    /// secret values.
    pub vars: Vec<(String, String)>,
    /// Credential file to delete at cleanup.
    pub file: PathBuf,
}

/// Decrypt `credential` and write it under `dir`.
pub async fn materialize(
    credential: &CloudCredential,
    cipher: &dyn CredentialCipher,
    dir: &Path,
) -> Result<CloudEnv> {
    let (extension, contents, mut vars) = match credential {
        CloudCredential::Aws {
            access_key,
            secret_key,
            security_token,
            region,
        } => {
            let mut ini = format!(
                "[default]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
                cipher.decipher(access_key)?.expose(),
                cipher.decipher(secret_key)?.expose(),
            );
            if let Some(token) = security_token {
                ini.push_str(&format!(
                    "aws_session_token = {}\n",
                    cipher.decipher(token)?.expose()
                ));
            }
            let mut vars = Vec::new();
            if let Some(region) = region {
                vars.push(("AWS_DEFAULT_REGION".to_string(), region.clone()));
            }
            ("ini", ini, vars)
        }
        CloudCredential::Gce {
            client_email,
            project,
            private_key,
        } => {
            let document = serde_json::json!({
                "type": "service_account",
                "client_email": client_email,
                "project_id": project,
                "private_key": cipher.decipher(private_key)?.expose(),
            });
            let vars = vec![("GOOGLE_PROJECT".to_string(), project.clone())];
            ("json", document.to_string(), vars)
        }
        CloudCredential::Azure {
            subscription,
            tenant,
            client_id,
            secret,
        } => {
            let document = serde_json::json!({
                "subscriptionId": subscription,
                "tenantId": tenant,
                "clientId": client_id,
                "clientSecret": cipher.decipher(secret)?.expose(),
            });
            let vars = vec![
                ("ARM_SUBSCRIPTION_ID".to_string(), subscription.clone()),
                ("ARM_TENANT_ID".to_string(), tenant.clone()),
                ("ARM_CLIENT_ID".to_string(), client_id.clone()),
            ];
            ("json", document.to_string(), vars)
        }
    };

    let file = dir.join(format!(
        "{}_{}.{}",
        credential.kind(),
        random_token(8),
        extension
    ));
    write_private(&file, contents.as_bytes())
        .await
        .map_err(|e| {
            WorkerError::CloudCredential(format!("could not write {}: {}", file.display(), e))
        })?;

    let location_var = match credential {
        CloudCredential::Aws { .. } => "AWS_SHARED_CREDENTIALS_FILE",
        CloudCredential::Gce { .. } => "GOOGLE_APPLICATION_CREDENTIALS",
        CloudCredential::Azure { .. } => "AZURE_AUTH_LOCATION",
    };
    vars.push((location_var.to_string(), file.display().to_string()));

    tracing::debug!(kind = credential.kind(), file = %file.display(), "Cloud credential written");
    Ok(CloudEnv { vars, file })
}
