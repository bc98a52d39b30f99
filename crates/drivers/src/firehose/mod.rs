//! `firehose` kind: a helm-deployed Kafka consumer on a kubernetes cluster.
//!
//! Actions are planned into an ordered list of step tokens carried in the
//! resource's module data; each sync pass performs one step.

mod config;
mod driver;

use std::sync::Arc;

use entropy_core::Clock;
use entropy_module::{
    ActionDesc, CREATE_ACTION, DELETE_ACTION, Descriptor, Driver, UPDATE_ACTION, decode_configs,
    merge_configs,
};
use serde_json::Value;

use crate::clients::ClusterClients;

pub use config::{FirehoseConfig, ModuleConfig, ResetParams, ResetTo, Transient};
pub use driver::FirehoseDriver;

pub const KIND: &str = "firehose";
/// Dependency key naming the cluster a firehose runs on.
pub const KUBE_DEPENDENCY: &str = "kube_cluster";

pub const SCALE_ACTION: &str = "scale";
pub const START_ACTION: &str = "start";
pub const STOP_ACTION: &str = "stop";
pub const RESET_ACTION: &str = "reset";
pub const UPGRADE_ACTION: &str = "upgrade";

pub const STEP_RELEASE_CREATE: &str = "release_create";
pub const STEP_RELEASE_UPDATE: &str = "release_update";
pub const STEP_RELEASE_STOP: &str = "release_stop";
pub const STEP_KAFKA_RESET: &str = "kafka_reset";
pub const STEP_RELEASE_DELETE: &str = "release_delete";

const CONFIG_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "replicas": {"type": "integer", "minimum": 1},
    "stopped": {"type": "boolean"},
    "chart_version": {"type": "string"},
    "env_variables": {"type": "object", "additionalProperties": {"type": "string"}},
    "chart_values": {"type": "object"}
  }
}"#;

const SCALE_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["replicas"],
  "properties": {"replicas": {"type": "integer", "minimum": 1}}
}"#;

const RESET_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["to"],
  "properties": {
    "to": {"type": "string", "enum": ["earliest", "latest", "datetime"]},
    "datetime": {"type": "string", "format": "date-time"}
  }
}"#;

/// Descriptor for the `firehose` kind.
pub fn descriptor(clients: Arc<dyn ClusterClients>, clock: Arc<dyn Clock>) -> Descriptor {
    Descriptor::new(
        KIND,
        Arc::new(move |configs: &Value| {
            let module: ModuleConfig = decode_configs(&merge_configs([configs]))?;
            Ok(Arc::new(FirehoseDriver::new(module, Arc::clone(&clients), Arc::clone(&clock))) as Arc<dyn Driver>)
        }),
    )
    .with_dependency(KUBE_DEPENDENCY, crate::kubernetes::KIND)
    .with_action(ActionDesc::new(CREATE_ACTION, "Deploy a new firehose").with_schema(CONFIG_SCHEMA))
    .with_action(ActionDesc::new(UPDATE_ACTION, "Update firehose configuration").with_schema(CONFIG_SCHEMA))
    .with_action(ActionDesc::new(DELETE_ACTION, "Tear the firehose down"))
    .with_action(ActionDesc::new(SCALE_ACTION, "Change the replica count").with_schema(SCALE_SCHEMA))
    .with_action(ActionDesc::new(START_ACTION, "Start a stopped firehose"))
    .with_action(ActionDesc::new(STOP_ACTION, "Scale the firehose to zero"))
    .with_action(ActionDesc::new(RESET_ACTION, "Reset consumer group offsets").with_schema(RESET_SCHEMA))
    .with_action(ActionDesc::new(UPGRADE_ACTION, "Move to the module's chart version"))
}
