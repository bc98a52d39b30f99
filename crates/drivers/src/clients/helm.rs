use async_trait::async_trait;
use serde::Deserialize;

use super::command::{is_not_found, run};
use super::connection::pem_file;
use super::{ClusterConnection, HelmClient, ReleaseInfo, ReleaseSpec};
use crate::error::{InfraError, InfraResult};

/// `helm` CLI bound to one cluster.
pub struct CliHelm {
    program: String,
    cluster: ClusterConnection,
}

#[derive(Deserialize)]
struct StatusOutput {
    name: String,
    namespace: String,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    info: StatusInfo,
}

#[derive(Deserialize, Default)]
struct StatusInfo {
    #[serde(default)]
    status: String,
}

impl From<StatusOutput> for ReleaseInfo {
    fn from(out: StatusOutput) -> Self {
        Self {
            name: out.name,
            namespace: out.namespace,
            status: out.info.status,
            revision: out.version,
        }
    }
}

impl CliHelm {
    pub fn new(program: impl Into<String>, cluster: ClusterConnection) -> Self {
        Self {
            program: program.into(),
            cluster,
        }
    }

    async fn cluster_args(&self) -> InfraResult<Vec<String>> {
        let mut args = vec!["--kube-apiserver".to_string(), self.cluster.host.clone()];
        if let Some(token) = &self.cluster.token {
            args.extend(["--kube-token".to_string(), token.clone()]);
        }
        if let Some(ca) = &self.cluster.cluster_ca_certificate {
            let path = pem_file("ca", ca).await?;
            args.extend(["--kube-ca-file".to_string(), path.display().to_string()]);
        }
        if self.cluster.insecure {
            args.push("--kube-insecure-skip-tls-verify".to_string());
        }
        Ok(args)
    }

    fn parse_status(&self, stdout: &str) -> InfraResult<ReleaseInfo> {
        serde_json::from_str::<StatusOutput>(stdout)
            .map(ReleaseInfo::from)
            .map_err(|e| InfraError::parse(&self.program, e))
    }
}

#[async_trait]
impl HelmClient for CliHelm {
    async fn upsert(&self, release: &ReleaseSpec) -> InfraResult<ReleaseInfo> {
        let values = serde_json::to_vec(&release.values).map_err(|e| InfraError::parse(&self.program, e))?;

        let mut args: Vec<String> = [
            "upgrade",
            "--install",
            release.name.as_str(),
            release.chart.name.as_str(),
            "--repo",
            release.chart.repository.as_str(),
            "--version",
            release.chart.version.as_str(),
            "--namespace",
            release.namespace.as_str(),
            "--create-namespace",
            "--values",
            "-",
            "--output",
            "json",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.extend(self.cluster_args().await?);

        let stdout = run(&self.program, &args, Some(&values)).await?;
        self.parse_status(&stdout)
    }

    async fn get(&self, name: &str, namespace: &str) -> InfraResult<Option<ReleaseInfo>> {
        let mut args: Vec<String> = ["status", name, "--namespace", namespace, "--output", "json"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.extend(self.cluster_args().await?);

        match run(&self.program, &args, None).await {
            Ok(stdout) => self.parse_status(&stdout).map(Some),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> InfraResult<()> {
        let mut args: Vec<String> = ["uninstall", name, "--namespace", namespace, "--wait"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.extend(self.cluster_args().await?);

        match run(&self.program, &args, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Err(InfraError::not_found(format!("release {namespace}/{name}"))),
            Err(err) => Err(err),
        }
    }
}
