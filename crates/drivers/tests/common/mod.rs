#![allow(clippy::unwrap_used, dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use entropy_core::{FixedClock, Resource, Status};
use entropy_drivers::firehose::{self, FirehoseDriver, ModuleConfig};
use entropy_drivers::{
    ClusterClients, ClusterConnection, HelmClient, InfraError, InfraResult, JobSpec, KubeClient,
    LineStream, PodInfo, ReleaseInfo, ReleaseSpec,
};
use entropy_module::ExpandedResource;
use futures::StreamExt;
use serde_json::{Value, json};

/// In-memory helm + kubectl.
#[derive(Default)]
pub struct FakeInfra {
    pub releases: Mutex<BTreeMap<String, ReleaseSpec>>,
    pub upserts: Mutex<Vec<ReleaseSpec>>,
    pub jobs: Mutex<Vec<JobSpec>>,
    pub pods: Mutex<Vec<PodInfo>>,
    pub logs: Mutex<BTreeMap<(String, String), Vec<String>>>,
    pub fail_helm: AtomicBool,
}

impl FakeInfra {
    pub fn with_pods(pods: Vec<PodInfo>) -> Arc<Self> {
        let infra = Self::default();
        *infra.pods.lock().unwrap() = pods;
        Arc::new(infra)
    }

    pub fn fail_helm(&self, fail: bool) {
        self.fail_helm.store(fail, Ordering::SeqCst);
    }

    fn check_helm(&self) -> InfraResult<()> {
        if self.fail_helm.load(Ordering::SeqCst) {
            return Err(InfraError::CommandFailed {
                program: "helm".into(),
                code: 1,
                stderr: "Kubernetes cluster unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HelmClient for FakeInfra {
    async fn upsert(&self, release: &ReleaseSpec) -> InfraResult<ReleaseInfo> {
        self.check_helm()?;
        self.upserts.lock().unwrap().push(release.clone());
        let mut releases = self.releases.lock().unwrap();
        releases.insert(release.name.clone(), release.clone());
        Ok(ReleaseInfo {
            name: release.name.clone(),
            namespace: release.namespace.clone(),
            status: "deployed".into(),
            revision: 1,
        })
    }

    async fn get(&self, name: &str, namespace: &str) -> InfraResult<Option<ReleaseInfo>> {
        Ok(self.releases.lock().unwrap().get(name).map(|r| ReleaseInfo {
            name: r.name.clone(),
            namespace: namespace.to_string(),
            status: "deployed".into(),
            revision: 1,
        }))
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> InfraResult<()> {
        self.check_helm()?;
        self.releases
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| InfraError::not_found(format!("release {namespace}/{name}")))
    }
}

#[async_trait]
impl KubeClient for FakeInfra {
    async fn server_version(&self) -> InfraResult<String> {
        Ok("v1.29.2".into())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        _selector: &BTreeMap<String, String>,
    ) -> InfraResult<Vec<PodInfo>> {
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn stream_logs(&self, _namespace: &str, pod: &str, container: &str) -> InfraResult<LineStream> {
        let lines = self
            .logs
            .lock()
            .unwrap()
            .get(&(pod.to_string(), container.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn run_job(&self, job: &JobSpec) -> InfraResult<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

pub struct FakeClients(pub Arc<FakeInfra>);

impl ClusterClients for FakeClients {
    fn helm(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn HelmClient>> {
        cluster.check()?;
        Ok(self.0.clone())
    }

    fn kube(&self, cluster: &ClusterConnection) -> InfraResult<Arc<dyn KubeClient>> {
        cluster.check()?;
        Ok(self.0.clone())
    }
}

pub fn clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
}

pub fn cluster_output() -> Value {
    json!({"host": "https://k8s.test", "token": "s3cr3t", "server_version": "v1.29.2"})
}

pub fn firehose_driver(infra: &Arc<FakeInfra>, clock: &FixedClock) -> FirehoseDriver {
    FirehoseDriver::new(
        ModuleConfig::default(),
        Arc::new(FakeClients(Arc::clone(infra))),
        Arc::new(clock.clone()),
    )
}

pub fn expand(res: &Resource) -> ExpandedResource {
    ExpandedResource::new(res.clone()).with_dependency(
        firehose::KUBE_DEPENDENCY,
        "kubernetes",
        cluster_output(),
    )
}

/// A firehose that finished deploying.
pub fn completed_firehose() -> Resource {
    let mut res = Resource::new("firehose", "project", "orders")
        .with_dependency(firehose::KUBE_DEPENDENCY, "urn:goto:entropy:kubernetes:project:main")
        .with_configs(json!({
            "deployment_id": "project-orders-firehose",
            "namespace": "firehose",
            "replicas": 2,
            "chart_version": "0.1.13",
            "env_variables": {
                "SOURCE_KAFKA_BROKERS": "kafka:9092",
                "SOURCE_KAFKA_CONSUMER_GROUP_ID": "orders-group"
            }
        }))
        .with_status(Status::Completed);
    res.state.output = json!({"namespace": "firehose", "release_name": "project-orders-firehose", "pods": []});
    res
}

pub fn pod(name: &str, containers: &[&str]) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        containers: containers.iter().map(ToString::to_string).collect(),
    }
}
