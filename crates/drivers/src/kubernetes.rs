//! `kubernetes` kind: a cluster connection other kinds depend on.
//!
//! There is nothing to reconcile; plan completes immediately and the output
//! republishes the connection so dependants can reach the cluster.

use std::sync::Arc;

use async_trait::async_trait;
use entropy_core::{Error, Resource, Result, State};
use entropy_module::{
    ActionDesc, ActionRequest, CREATE_ACTION, Descriptor, Driver, ExpandedResource, UPDATE_ACTION,
    completed_state, decode_configs, merge_configs,
};
use serde_json::Value;
use tracing::debug;

use crate::clients::{ClusterClients, ClusterConnection};

pub const KIND: &str = "kubernetes";

const CONNECTION_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["host"],
  "properties": {
    "host": {"type": "string", "minLength": 1},
    "token": {"type": "string"},
    "client_certificate": {"type": "string"},
    "client_key": {"type": "string"},
    "cluster_ca_certificate": {"type": "string"},
    "insecure": {"type": "boolean"},
    "namespace": {"type": "string"}
  }
}"#;

const UPDATE_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "host": {"type": "string", "minLength": 1},
    "token": {"type": "string"},
    "insecure": {"type": "boolean"},
    "namespace": {"type": "string"}
  }
}"#;

/// Descriptor for the `kubernetes` kind.
pub fn descriptor(clients: Arc<dyn ClusterClients>) -> Descriptor {
    Descriptor::new(
        KIND,
        Arc::new(move |_configs: &Value| {
            Ok(Arc::new(KubernetesDriver::new(Arc::clone(&clients))) as Arc<dyn Driver>)
        }),
    )
    .with_action(ActionDesc::new(CREATE_ACTION, "Register a kubernetes cluster").with_schema(CONNECTION_SCHEMA))
    .with_action(ActionDesc::new(UPDATE_ACTION, "Update the cluster connection").with_schema(UPDATE_SCHEMA))
}

pub struct KubernetesDriver {
    clients: Arc<dyn ClusterClients>,
}

impl KubernetesDriver {
    pub fn new(clients: Arc<dyn ClusterClients>) -> Self {
        Self { clients }
    }
}

fn connection_output(conn: &ClusterConnection) -> Result<Value> {
    serde_json::to_value(conn).map_err(|e| Error::internal("failed to encode connection").with_cause(e))
}

#[async_trait]
impl Driver for KubernetesDriver {
    async fn plan(&self, expanded: ExpandedResource, action: ActionRequest) -> Result<Resource> {
        let mut res = expanded.resource;

        let configs = if action.is_create() {
            merge_configs([&action.params])
        } else {
            merge_configs([&res.spec.configs, &action.params])
        };
        let conn: ClusterConnection = decode_configs(&configs)?;
        conn.check()
            .map_err(|e| Error::invalid("invalid kubernetes connection").with_cause(e))?;

        res.spec.configs = configs;
        res.state = completed_state(connection_output(&conn)?);
        Ok(res)
    }

    async fn sync(&self, expanded: ExpandedResource) -> Result<State> {
        let output = self.output(expanded).await?;
        Ok(completed_state(output))
    }

    async fn output(&self, expanded: ExpandedResource) -> Result<Value> {
        let conn: ClusterConnection = decode_configs(&expanded.resource.spec.configs)?;
        let mut output = connection_output(&conn)?;

        let version = match self.clients.kube(&conn) {
            Ok(kube) => kube.server_version().await.ok(),
            Err(e) => {
                debug!(error = %e, "Cluster unreachable, skipping server version");
                None
            }
        };
        if let (Some(version), Value::Object(map)) = (version, &mut output) {
            map.insert("server_version".to_string(), Value::String(version));
        }
        Ok(output)
    }
}
