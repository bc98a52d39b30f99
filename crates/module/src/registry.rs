//! Process-wide kind → descriptor table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use entropy_core::{Error, Module, OptionExt, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::descriptor::Descriptor;
use crate::driver::{ActionRequest, Driver};

/// A registered kind: its descriptor plus compiled param schemas.
pub struct RegisteredKind {
    descriptor: Descriptor,
    schemas: HashMap<String, jsonschema::Validator>,
}

impl RegisteredKind {
    fn compile(descriptor: Descriptor) -> Result<Self> {
        let mut schemas = HashMap::new();
        for action in &descriptor.actions {
            if schemas.contains_key(&action.name) {
                return Err(Error::invalid(format!(
                    "kind '{}' declares action '{}' twice",
                    descriptor.kind, action.name
                )));
            }
            let Some(raw) = action.param_schema.as_deref() else {
                continue;
            };
            let schema: Value = serde_json::from_str(raw).map_err(|e| {
                Error::invalid(format!(
                    "param schema of action '{}' on kind '{}' is not JSON",
                    action.name, descriptor.kind
                ))
                .with_cause(e)
            })?;
            let validator = jsonschema::options().build(&schema).map_err(|e| {
                Error::invalid(format!(
                    "param schema of action '{}' on kind '{}' does not compile",
                    action.name, descriptor.kind
                ))
                .with_cause(e)
            })?;
            schemas.insert(action.name.clone(), validator);
        }
        Ok(Self {
            descriptor,
            schemas,
        })
    }

    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Check that `action` is declared and its params satisfy the schema.
    pub fn validate_action(&self, action: &ActionRequest) -> Result<()> {
        if self.descriptor.action(&action.name).is_none() {
            return Err(Error::invalid(format!(
                "action '{}' is not supported on kind '{}'",
                action.name, self.descriptor.kind
            )));
        }

        let Some(validator) = self.schemas.get(&action.name) else {
            return Ok(());
        };
        let empty = Value::Object(serde_json::Map::new());
        let params = if action.params.is_null() {
            &empty
        } else {
            &action.params
        };

        let problems: Vec<String> = validator.iter_errors(params).map(|e| e.to_string()).collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "invalid params for action '{}'",
                action.name
            ))
            .with_cause(problems.join("; ")))
        }
    }
}

/// Thread-safe registry of kinds. Reads are hot, writes happen at startup.
#[derive(Default)]
pub struct Registry {
    kinds: RwLock<HashMap<String, Arc<RegisteredKind>>>,
}

fn poisoned() -> Error {
    Error::internal("module registry lock poisoned")
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. `Conflict` when the kind is already present; `Invalid`
    /// when a param schema does not compile.
    pub fn register(&self, descriptor: Descriptor) -> Result<()> {
        let kind = descriptor.kind.clone();
        entropy_core::validate_name("kind", &kind)?;
        let compiled = RegisteredKind::compile(descriptor)?;

        let mut kinds = self.kinds.write().map_err(|_| poisoned())?;
        if kinds.contains_key(&kind) {
            return Err(Error::conflict(format!("kind '{kind}' is already registered")));
        }
        kinds.insert(kind.clone(), Arc::new(compiled));
        info!(kind = %kind, "Registered kind");
        Ok(())
    }

    /// Look up a registered kind.
    pub fn get(&self, kind: &str) -> Result<Arc<RegisteredKind>> {
        self.kinds
            .read()
            .map_err(|_| poisoned())?
            .get(kind)
            .cloned()
            .or_not_found(format!("kind '{kind}' is not registered"))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Result<Vec<String>> {
        let mut kinds: Vec<String> = self.kinds.read().map_err(|_| poisoned())?.keys().cloned().collect();
        kinds.sort();
        Ok(kinds)
    }

    /// Instantiate the driver configured by `module`. The module name is the
    /// kind. Factory failures are `Invalid`.
    pub fn get_driver(&self, module: &Module) -> Result<(Arc<dyn Driver>, Arc<RegisteredKind>)> {
        let registered = self.get(&module.name)?;
        let driver = (registered.descriptor.driver_factory)(&module.configs).map_err(|e| {
            Error::invalid(format!("failed to initialise driver for module '{}'", module.urn))
                .with_cause(e)
        })?;
        debug!(module = %module.urn, "Driver initialised");
        Ok((driver, registered))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.kinds().unwrap_or_default();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}
