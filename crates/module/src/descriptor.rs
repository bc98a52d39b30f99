//! Static description of a kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use entropy_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::Driver;

/// Builds a driver from a module's configs.
pub type DriverFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// One legal action of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDesc {
    pub name: String,
    pub description: String,
    /// JSON Schema for the action params, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_schema: Option<String>,
}

impl ActionDesc {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_schema: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.param_schema = Some(schema.into());
        self
    }
}

/// Declares a kind: its actions, dependency slots and driver factory.
#[derive(Clone)]
pub struct Descriptor {
    pub kind: String,
    pub actions: Vec<ActionDesc>,
    /// Dependency key to required dependency kind.
    pub dependencies: BTreeMap<String, String>,
    pub driver_factory: DriverFactory,
}

impl Descriptor {
    pub fn new(kind: impl Into<String>, driver_factory: DriverFactory) -> Self {
        Self {
            kind: kind.into(),
            actions: Vec::new(),
            dependencies: BTreeMap::new(),
            driver_factory,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: ActionDesc) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>, kind: impl Into<String>) -> Self {
        self.dependencies.insert(key.into(), kind.into());
        self
    }

    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDesc> {
        self.actions.iter().find(|action| action.name == name)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind)
            .field("actions", &self.actions)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
