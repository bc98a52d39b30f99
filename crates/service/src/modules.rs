//! Module CRUD. A module configures the driver of one kind in one project.

use std::sync::Arc;

use entropy_core::{Clock, Error, ErrorKind, Module, Result};
use entropy_module::Registry;
use entropy_store::ModuleStore;
use serde_json::Value;
use tracing::info;

pub struct ModuleService {
    store: Arc<dyn ModuleStore>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
}

impl ModuleService {
    pub fn new(store: Arc<dyn ModuleStore>, registry: Arc<Registry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    /// The kind must be registered and its driver factory must accept the
    /// configs.
    fn check_configs(&self, module: &Module) -> Result<()> {
        self.registry.get_driver(module).map(|_| ()).map_err(|e| {
            if e.is_kind(ErrorKind::NotFound) {
                e.wrap(format!("kind '{}' is not registered", module.name))
                    .into_kind(ErrorKind::Invalid)
            } else {
                e
            }
        })
    }

    pub async fn create_module(&self, mut module: Module) -> Result<Module> {
        module.validate()?;
        self.check_configs(&module)?;

        let now = self.clock.now();
        module.created_at = now;
        module.updated_at = now;
        self.store.create_module(&module).await.map_err(|e| {
            if e.is_kind(ErrorKind::Conflict) {
                Error::conflict(format!("module with urn '{}' already exists", module.urn))
            } else {
                e
            }
        })?;
        info!(urn = %module.urn, "Module created");
        Ok(module)
    }

    pub async fn get_module(&self, urn: &str) -> Result<Module> {
        self.store.get_module(urn).await
    }

    pub async fn list_modules(&self, project: Option<&str>) -> Result<Vec<Module>> {
        self.store.list_modules(project).await
    }

    pub async fn update_module(&self, urn: &str, configs: Value) -> Result<Module> {
        let mut module = self.store.get_module(urn).await?;
        module.configs = configs;
        self.check_configs(&module)?;

        module.updated_at = self.clock.now();
        self.store.update_module(&module).await?;
        info!(urn = %module.urn, "Module updated");
        Ok(module)
    }

    /// Resources of this kind stay in place; they fail to resolve until a
    /// module is configured again.
    pub async fn delete_module(&self, urn: &str) -> Result<()> {
        self.store.delete_module(urn).await?;
        info!(urn = %urn, "Module deleted");
        Ok(())
    }
}
