//! The contract every kind's driver implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use entropy_core::{Resource, Result, State};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in action creating a resource.
pub const CREATE_ACTION: &str = "create";
/// Built-in action updating a resource's spec.
pub const UPDATE_ACTION: &str = "update";
/// Built-in action tearing a resource down.
pub const DELETE_ACTION: &str = "delete";

/// A named operation requested on a resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn is_create(&self) -> bool {
        self.name == CREATE_ACTION
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.name == DELETE_ACTION
    }
}

/// What a driver sees of a dependency: its kind and current output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub kind: String,
    pub output: Value,
}

/// A resource together with its resolved dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedResource {
    pub resource: Resource,
    pub dependencies: BTreeMap<String, ResolvedDependency>,
}

impl ExpandedResource {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            dependencies: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>, kind: impl Into<String>, output: Value) -> Self {
        self.dependencies.insert(
            key.into(),
            ResolvedDependency {
                kind: kind.into(),
                output,
            },
        );
        self
    }

    /// Output of the dependency under `key`.
    pub fn dependency_output(&self, key: &str) -> Result<&Value> {
        self.dependencies
            .get(key)
            .map(|dep| &dep.output)
            .ok_or_else(|| entropy_core::Error::invalid(format!("dependency '{key}' is not resolved")))
    }
}

/// One piece of a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub data: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Selector for log streams (e.g. `pod`, `container`).
pub type LogFilter = BTreeMap<String, String>;

/// Lazy sequence of log chunks; dropping it stops the stream.
pub type LogStream = BoxStream<'static, Result<LogChunk>>;

/// Per-kind reconciliation logic.
///
/// `plan` is pure; `sync` advances one step and must be safe to retry;
/// `output` only reads.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Compute the next desired resource for `action`.
    async fn plan(&self, expanded: ExpandedResource, action: ActionRequest) -> Result<Resource>;

    /// Perform one step toward the planned state.
    async fn sync(&self, expanded: ExpandedResource) -> Result<State>;

    /// Refresh the observed output.
    async fn output(&self, expanded: ExpandedResource) -> Result<Value>;

    /// Log capability, when the kind supports it.
    fn as_loggable(&self) -> Option<&dyn Loggable> {
        None
    }
}

/// Optional log streaming capability.
#[async_trait]
pub trait Loggable: Send + Sync {
    async fn log(&self, expanded: ExpandedResource, filter: LogFilter) -> Result<LogStream>;
}
