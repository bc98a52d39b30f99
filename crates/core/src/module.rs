//! Module rows: per-(kind, project) configuration for a driver factory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::resource::{URN_ORG, URN_SERVICE, validate_name};

/// Kind segment used for module URNs.
pub const MODULE_KIND: &str = "module";

/// Derive the URN of the module configuring `name` within `project`.
#[must_use]
pub fn module_urn(project: &str, name: &str) -> String {
    format!("urn:{URN_ORG}:{URN_SERVICE}:{MODULE_KIND}:{project}:{name}")
}

/// Configuration row for a kind instance. `name` equals the kind it configures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub urn: String,
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub configs: Value,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Module {
    pub fn new(project: impl Into<String>, name: impl Into<String>, configs: Value) -> Self {
        let project = project.into();
        let name = name.into();
        Self {
            urn: module_urn(&project, &name),
            name,
            project,
            configs,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }

    /// Trim identifiers, check them and derive the URN.
    pub fn validate(&mut self) -> Result<()> {
        self.name = self.name.trim().to_string();
        self.project = self.project.trim().to_string();
        validate_name("name", &self.name)?;
        validate_name("project", &self.project)?;
        self.urn = module_urn(&self.project, &self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_module_urn() {
        let module = Module::new("foo", "firehose", json!({}));
        assert_eq!(module.urn, "urn:goto:entropy:module:foo:firehose");
    }

    #[test]
    fn test_validate_rejects_bad_project() {
        let mut module = Module::new("-", "firehose", Value::Null);
        let result = module.validate();
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Invalid));
    }
}
