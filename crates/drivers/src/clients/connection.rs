use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{InfraError, InfraResult};

/// How to reach a kubernetes API server. Certificates are PEM strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnection {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ca_certificate: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ClusterConnection {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn check(&self) -> InfraResult<()> {
        if self.host.trim().is_empty() {
            return Err(InfraError::Connection {
                reason: "host is empty".to_string(),
            });
        }
        if self.client_certificate.is_some() != self.client_key.is_some() {
            return Err(InfraError::Connection {
                reason: "client_certificate and client_key must be set together".to_string(),
            });
        }
        Ok(())
    }
}

/// Write PEM material to a content-addressed file so CLIs can read it.
pub(crate) async fn pem_file(kind: &str, pem: &str) -> InfraResult<PathBuf> {
    let digest = Sha256::digest(pem.as_bytes());
    let short: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    let path = std::env::temp_dir().join(format!("entropy-{kind}-{short}.pem"));

    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(path);
    }
    tokio::fs::write(&path, pem)
        .await
        .map_err(|e| InfraError::spawn("pem-writer", e))?;
    Ok(path)
}
