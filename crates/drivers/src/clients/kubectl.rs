use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command::run;
use super::connection::pem_file;
use super::{ClusterConnection, JobSpec, KubeClient, LineStream, PodInfo};
use crate::error::{InfraError, InfraResult};

/// `kubectl` CLI bound to one cluster.
pub struct CliKube {
    program: String,
    cluster: ClusterConnection,
    job_timeout_secs: u64,
}

#[derive(Deserialize)]
struct VersionOutput {
    #[serde(rename = "serverVersion")]
    server_version: GitVersion,
}

#[derive(Deserialize)]
struct GitVersion {
    #[serde(rename = "gitVersion")]
    git_version: String,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Deserialize)]
struct Pod {
    metadata: Metadata,
    spec: PodSpec,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    name: String,
}

impl CliKube {
    pub fn new(program: impl Into<String>, cluster: ClusterConnection, job_timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            cluster,
            job_timeout_secs,
        }
    }

    async fn cluster_args(&self) -> InfraResult<Vec<String>> {
        let mut args = vec!["--server".to_string(), self.cluster.host.clone()];
        if let Some(token) = &self.cluster.token {
            args.extend(["--token".to_string(), token.clone()]);
        }
        if let Some(ca) = &self.cluster.cluster_ca_certificate {
            let path = pem_file("ca", ca).await?;
            args.extend(["--certificate-authority".to_string(), path.display().to_string()]);
        }
        if let (Some(cert), Some(key)) = (&self.cluster.client_certificate, &self.cluster.client_key) {
            let cert = pem_file("cert", cert).await?;
            let key = pem_file("key", key).await?;
            args.extend([
                "--client-certificate".to_string(),
                cert.display().to_string(),
                "--client-key".to_string(),
                key.display().to_string(),
            ]);
        }
        if self.cluster.insecure {
            args.push("--insecure-skip-tls-verify".to_string());
        }
        Ok(args)
    }

    async fn kubectl(&self, args: &[&str], stdin: Option<&[u8]>) -> InfraResult<String> {
        let mut full: Vec<String> = args.iter().map(ToString::to_string).collect();
        full.extend(self.cluster_args().await?);
        run(&self.program, &full, stdin).await
    }
}

fn selector_arg(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn job_manifest(job: &JobSpec) -> serde_json::Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job.name,
            "namespace": job.namespace,
            "labels": job.labels,
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": 600,
            "template": {
                "metadata": { "labels": job.labels },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "main",
                        "image": job.image,
                        "command": job.command,
                    }],
                },
            },
        },
    })
}

#[async_trait]
impl KubeClient for CliKube {
    async fn server_version(&self) -> InfraResult<String> {
        let stdout = self.kubectl(&["version", "--output", "json"], None).await?;
        serde_json::from_str::<VersionOutput>(&stdout)
            .map(|v| v.server_version.git_version)
            .map_err(|e| InfraError::parse(&self.program, e))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> InfraResult<Vec<PodInfo>> {
        let selector = selector_arg(selector);
        let stdout = self
            .kubectl(
                &["get", "pods", "--namespace", namespace, "--selector", selector.as_str(), "--output", "json"],
                None,
            )
            .await?;

        let list: PodList = serde_json::from_str(&stdout).map_err(|e| InfraError::parse(&self.program, e))?;
        let mut pods: Vec<PodInfo> = list
            .items
            .into_iter()
            .map(|pod| PodInfo {
                name: pod.metadata.name,
                containers: pod.spec.containers.into_iter().map(|c| c.name).collect(),
            })
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pods)
    }

    async fn stream_logs(&self, namespace: &str, pod: &str, container: &str) -> InfraResult<LineStream> {
        let mut args: Vec<String> = ["logs", "--follow", pod, "--container", container, "--namespace", namespace]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.extend(self.cluster_args().await?);

        debug!(pod = %pod, container = %container, "Following container logs");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InfraError::spawn(&self.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InfraError::spawn(&self.program, "stdout not captured"))?;
        let lines = BufReader::new(stdout).lines();
        let program = self.program.clone();

        // The child rides along in the stream state so dropping the stream kills it.
        let stream = futures::stream::unfold((lines, child), move |(mut lines, child)| {
            let program = program.clone();
            async move {
                match lines.next_line().await {
                    Ok(Some(line)) => Some((Ok(line), (lines, child))),
                    Ok(None) => None,
                    Err(e) => Some((Err(InfraError::spawn(program, e)), (lines, child))),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn run_job(&self, job: &JobSpec) -> InfraResult<()> {
        let manifest =
            serde_json::to_vec(&job_manifest(job)).map_err(|e| InfraError::parse(&self.program, e))?;

        info!(job = %job.name, namespace = %job.namespace, "Creating job");
        self.kubectl(&["apply", "--filename", "-"], Some(&manifest)).await?;

        let target = format!("job/{}", job.name);
        let timeout = format!("--timeout={}s", self.job_timeout_secs);
        let waited = self
            .kubectl(
                &["wait", "--for=condition=complete", target.as_str(), "--namespace", job.namespace.as_str(), timeout.as_str()],
                None,
            )
            .await;

        // Jobs are immutable; a failed one must go before the next apply.
        let deleted = self
            .kubectl(
                &["delete", target.as_str(), "--namespace", job.namespace.as_str(), "--ignore-not-found"],
                None,
            )
            .await;

        match (waited, deleted) {
            (Ok(_), deleted) => deleted.map(|_| ()),
            (Err(err), deleted) => {
                if let Err(cleanup) = deleted {
                    warn!(job = %job.name, error = %cleanup, "Failed to delete unfinished job");
                }
                Err(err)
            }
        }
    }
}
