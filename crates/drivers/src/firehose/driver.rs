use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use entropy_core::{Clock, Error, Resource, Result, State, Status, SyncResult};
use entropy_module::{
    ActionRequest, CREATE_ACTION, DELETE_ACTION, Driver, ExpandedResource, LogChunk, LogFilter,
    LogStream, Loggable, MAX_RELEASE_NAME_LEN, UPDATE_ACTION, completed_state, decode_configs,
    decode_transient, encode_transient, merge_configs, pending_state, safe_name,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::config::{FirehoseConfig, ModuleConfig, ResetParams, Transient};
use super::{
    KUBE_DEPENDENCY, RESET_ACTION, SCALE_ACTION, START_ACTION, STEP_KAFKA_RESET, STEP_RELEASE_CREATE,
    STEP_RELEASE_DELETE, STEP_RELEASE_STOP, STEP_RELEASE_UPDATE, STOP_ACTION, UPGRADE_ACTION,
};
use crate::clients::{ClusterClients, ClusterConnection, HelmClient, JobSpec, KubeClient, ReleaseSpec};

const APP_LABEL: &str = "app";

pub struct FirehoseDriver {
    module: ModuleConfig,
    clients: Arc<dyn ClusterClients>,
    clock: Arc<dyn Clock>,
}

fn params<T: DeserializeOwned>(action: &ActionRequest) -> Result<T> {
    decode_configs(&action.params).map_err(|e| e.wrap(format!("invalid params for '{}'", action.name)))
}

fn encode_config(conf: &FirehoseConfig) -> Result<Value> {
    serde_json::to_value(conf).map_err(|e| Error::internal("failed to encode firehose configs").with_cause(e))
}

impl FirehoseDriver {
    pub fn new(module: ModuleConfig, clients: Arc<dyn ClusterClients>, clock: Arc<dyn Clock>) -> Self {
        Self {
            module,
            clients,
            clock,
        }
    }

    fn cluster(expanded: &ExpandedResource) -> Result<ClusterConnection> {
        let output = expanded.dependency_output(KUBE_DEPENDENCY)?;
        decode_configs(output).map_err(|e| e.wrap("kube_cluster output is not a cluster connection"))
    }

    fn helm(&self, expanded: &ExpandedResource) -> Result<Arc<dyn HelmClient>> {
        Ok(self.clients.helm(&Self::cluster(expanded)?)?)
    }

    fn kube(&self, expanded: &ExpandedResource) -> Result<Arc<dyn KubeClient>> {
        Ok(self.clients.kube(&Self::cluster(expanded)?)?)
    }

    fn selector(conf: &FirehoseConfig) -> BTreeMap<String, String> {
        BTreeMap::from([(APP_LABEL.to_string(), conf.deployment_id.clone())])
    }

    fn release(&self, conf: &FirehoseConfig, stopped: bool) -> ReleaseSpec {
        let mut chart = self.module.chart.clone();
        if !conf.chart_version.is_empty() {
            chart.version.clone_from(&conf.chart_version);
        }

        let mut labels = self.module.labels.clone();
        labels.extend(Self::selector(conf));

        let replicas = if stopped { 0 } else { conf.replicas };
        let generated = json!({
            "replicaCount": replicas,
            "labels": labels,
            "firehose": { "config": conf.env_variables },
        });

        ReleaseSpec {
            name: conf.deployment_id.clone(),
            namespace: conf.namespace.clone(),
            chart,
            values: merge_configs([&generated, &conf.chart_values]),
        }
    }

    fn reset_job(&self, conf: &FirehoseConfig, reset: &ResetParams) -> Result<JobSpec> {
        let (brokers, group) = conf.kafka_source()?;
        let mut command: Vec<String> = [
            "kafka-consumer-groups.sh",
            "--bootstrap-server",
            brokers,
            "--group",
            group,
            "--reset-offsets",
            "--all-topics",
            "--execute",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        command.extend(reset.offset_args());

        Ok(JobSpec {
            name: safe_name(&format!("{}-reset", conf.deployment_id), MAX_RELEASE_NAME_LEN),
            namespace: conf.namespace.clone(),
            image: self.module.kafka_image.clone(),
            command,
            labels: Self::selector(conf),
        })
    }

    /// Apply `action` to the current config and pick the steps it needs.
    fn plan_config(
        &self,
        res: &Resource,
        action: &ActionRequest,
    ) -> Result<(FirehoseConfig, Transient)> {
        let existing = || decode_configs::<FirehoseConfig>(&merge_configs([&res.spec.configs]));

        match action.name.as_str() {
            CREATE_ACTION => {
                let mut conf: FirehoseConfig =
                    decode_configs(&merge_configs([&self.module.defaults, &action.params]))?;
                if conf.deployment_id.is_empty() {
                    conf.deployment_id = safe_name(
                        &format!("{}-{}-firehose", res.project, res.name),
                        MAX_RELEASE_NAME_LEN,
                    );
                }
                if conf.namespace.is_empty() {
                    conf.namespace.clone_from(&self.module.namespace);
                }
                if conf.chart_version.is_empty() {
                    conf.chart_version.clone_from(&self.module.chart.version);
                }
                Ok((conf, Transient::steps(&[STEP_RELEASE_CREATE])))
            }
            UPDATE_ACTION => {
                let current = existing()?;
                let mut conf: FirehoseConfig = decode_configs(&merge_configs([
                    &self.module.defaults,
                    &res.spec.configs,
                    &action.params,
                ]))?;
                conf.deployment_id = current.deployment_id;
                conf.namespace = current.namespace;
                Ok((conf, Transient::steps(&[STEP_RELEASE_UPDATE])))
            }
            SCALE_ACTION => {
                let scale: super::config::ScaleParams = params(action)?;
                let mut conf = existing()?;
                conf.replicas = scale.replicas;
                Ok((conf, Transient::steps(&[STEP_RELEASE_UPDATE])))
            }
            START_ACTION => {
                let mut conf = existing()?;
                conf.stopped = false;
                Ok((conf, Transient::steps(&[STEP_RELEASE_UPDATE])))
            }
            STOP_ACTION => {
                let mut conf = existing()?;
                conf.stopped = true;
                Ok((conf, Transient::steps(&[STEP_RELEASE_STOP])))
            }
            RESET_ACTION => {
                let reset: ResetParams = params(action)?;
                reset.validate()?;
                let conf = existing()?;
                conf.kafka_source()?;
                let mut transient =
                    Transient::steps(&[STEP_RELEASE_STOP, STEP_KAFKA_RESET, STEP_RELEASE_UPDATE]);
                transient.reset = Some(reset);
                Ok((conf, transient))
            }
            UPGRADE_ACTION => {
                let mut conf = existing()?;
                conf.chart_version.clone_from(&self.module.chart.version);
                Ok((conf, Transient::steps(&[STEP_RELEASE_UPDATE])))
            }
            DELETE_ACTION => Ok((existing()?, Transient::steps(&[STEP_RELEASE_DELETE]))),
            other => Err(Error::invalid(format!("unknown firehose action '{other}'"))),
        }
    }

    async fn run_step(
        &self,
        step: &str,
        expanded: &ExpandedResource,
        conf: &FirehoseConfig,
        transient: &Transient,
    ) -> Result<()> {
        debug!(urn = %expanded.resource.urn, step = %step, "Running firehose step");
        match step {
            STEP_RELEASE_CREATE | STEP_RELEASE_UPDATE => {
                self.helm(expanded)?.upsert(&self.release(conf, conf.stopped)).await?;
            }
            STEP_RELEASE_STOP => {
                self.helm(expanded)?.upsert(&self.release(conf, true)).await?;
            }
            STEP_KAFKA_RESET => {
                let reset = transient
                    .reset
                    .as_ref()
                    .ok_or_else(|| Error::invalid("kafka_reset step without reset target"))?;
                let job = self.reset_job(conf, reset)?;
                self.kube(expanded)?.run_job(&job).await?;
            }
            STEP_RELEASE_DELETE => {
                match self.helm(expanded)?.uninstall(&conf.deployment_id, &conf.namespace).await {
                    Err(e) if e.is_not_found() => {
                        debug!(release = %conf.deployment_id, "Release already gone");
                    }
                    other => other?,
                }
            }
            unknown => return Err(Error::invalid(format!("unknown firehose step '{unknown}'"))),
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for FirehoseDriver {
    async fn plan(&self, expanded: ExpandedResource, action: ActionRequest) -> Result<Resource> {
        let mut res = expanded.resource;
        let (conf, transient) = self.plan_config(&res, &action)?;
        conf.validate()?;

        res.spec.configs = encode_config(&conf)?;
        res.state = State {
            status: if action.is_delete() {
                Status::Deleted
            } else {
                Status::Pending
            },
            output: res.state.output,
            module_data: encode_transient(&transient)?,
            next_sync_at: None,
            sync_result: SyncResult::default(),
        };
        Ok(res)
    }

    async fn sync(&self, expanded: ExpandedResource) -> Result<State> {
        let conf: FirehoseConfig = decode_configs(&expanded.resource.spec.configs)?;
        let mut transient: Transient = decode_transient(&expanded.resource.state.module_data)?;

        if let Some(step) = transient.pending_steps.pop_front() {
            self.run_step(&step, &expanded, &conf, &transient).await?;
        }

        if !transient.pending_steps.is_empty() {
            return Ok(pending_state(
                &expanded.resource.state,
                encode_transient(&transient)?,
                self.clock.now(),
            ));
        }

        if expanded.resource.state.in_deletion() {
            info!(urn = %expanded.resource.urn, "Firehose torn down");
            return Ok(completed_state(Value::Null));
        }
        let output = self.output(expanded).await?;
        Ok(completed_state(output))
    }

    async fn output(&self, expanded: ExpandedResource) -> Result<Value> {
        let conf: FirehoseConfig = decode_configs(&expanded.resource.spec.configs)?;
        let pods = self
            .kube(&expanded)?
            .list_pods(&conf.namespace, &Self::selector(&conf))
            .await?;

        Ok(json!({
            "namespace": conf.namespace,
            "release_name": conf.deployment_id,
            "pods": pods,
        }))
    }

    fn as_loggable(&self) -> Option<&dyn Loggable> {
        Some(self)
    }
}

#[async_trait]
impl Loggable for FirehoseDriver {
    async fn log(&self, expanded: ExpandedResource, filter: LogFilter) -> Result<LogStream> {
        let conf: FirehoseConfig = decode_configs(&expanded.resource.spec.configs)?;
        let kube = self.kube(&expanded)?;
        let pods = kube.list_pods(&conf.namespace, &Self::selector(&conf)).await?;

        let wanted = |key: &str, value: &str| filter.get(key).is_none_or(|want| want == value);

        let mut streams = Vec::new();
        for pod in pods.iter().filter(|pod| wanted("pod", &pod.name)) {
            for container in pod.containers.iter().filter(|c| wanted("container", c)) {
                let labels = BTreeMap::from([
                    ("pod".to_string(), pod.name.clone()),
                    ("container".to_string(), container.clone()),
                ]);
                let lines = kube.stream_logs(&conf.namespace, &pod.name, container).await?;
                streams.push(
                    lines
                        .map(move |line| {
                            line.map(|data| LogChunk {
                                data,
                                labels: labels.clone(),
                            })
                            .map_err(Error::from)
                        })
                        .boxed(),
                );
            }
        }

        if streams.is_empty() {
            return Err(Error::not_found("no containers match the log filter"));
        }
        Ok(futures::stream::select_all(streams).boxed())
    }
}
