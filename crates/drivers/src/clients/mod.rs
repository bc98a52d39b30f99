//! Infrastructure seams used by drivers.
//!
//! Drivers never shell out directly; they go through [`HelmClient`] and
//! [`KubeClient`], obtained per cluster from a [`ClusterClients`] factory.
//! The CLI-backed implementations wrap `helm` and `kubectl`.

mod command;
mod connection;
mod helm;
mod kubectl;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InfraResult;

pub use connection::ClusterConnection;
pub use helm::CliHelm;
pub use kubectl::CliKube;

/// Chart coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub repository: String,
    pub name: String,
    pub version: String,
}

/// Desired helm release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub name: String,
    pub namespace: String,
    pub chart: ChartRef,
    pub values: Value,
}

/// Observed helm release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub revision: u64,
}

/// A pod and its container names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub containers: Vec<String>,
}

/// A run-to-completion kubernetes job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Lines of a container log, ending when the container does.
pub type LineStream = BoxStream<'static, InfraResult<String>>;

#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Install the release, or upgrade it when it already exists.
    async fn upsert(&self, release: &ReleaseSpec) -> InfraResult<ReleaseInfo>;

    async fn get(&self, name: &str, namespace: &str) -> InfraResult<Option<ReleaseInfo>>;

    /// `NotFound` when the release does not exist.
    async fn uninstall(&self, name: &str, namespace: &str) -> InfraResult<()>;
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn server_version(&self) -> InfraResult<String>;

    /// Pods in `namespace` matching every label in `selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> InfraResult<Vec<PodInfo>>;

    async fn stream_logs(&self, namespace: &str, pod: &str, container: &str) -> InfraResult<LineStream>;

    /// Create `job` and wait for it to complete.
    async fn run_job(&self, job: &JobSpec) -> InfraResult<()>;
}

/// Builds clients bound to a cluster connection.
pub trait ClusterClients: Send + Sync {
    fn helm(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn HelmClient>>;

    fn kube(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn KubeClient>>;
}

/// Paths to the `helm` and `kubectl` binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliClients {
    pub helm_path: String,
    pub kubectl_path: String,
    /// Seconds `kubectl wait` allows a job to finish.
    pub job_timeout_secs: u64,
}

impl Default for CliClients {
    fn default() -> Self {
        Self {
            helm_path: "helm".to_string(),
            kubectl_path: "kubectl".to_string(),
            job_timeout_secs: 300,
        }
    }
}

impl ClusterClients for CliClients {
    fn helm(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn HelmClient>> {
        cluster.check()?;
        Ok(Arc::new(CliHelm::new(&self.helm_path, cluster.clone())))
    }

    fn kube(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn KubeClient>> {
        cluster.check()?;
        Ok(Arc::new(CliKube::new(
            &self.kubectl_path,
            cluster.clone(),
            self.job_timeout_secs,
        )))
    }
}
