//! Driver resolution and dependency expansion shared by the service and the
//! sync worker.

use std::sync::Arc;

use entropy_core::{Error, ErrorKind, Resource, Result, Status, module_urn};
use entropy_module::{Descriptor, Driver, ExpandedResource, RegisteredKind, Registry, ResolvedDependency};
use entropy_store::{ModuleStore, ResourceStore};
use tracing::debug;

/// A driver ready to act on one resource.
pub struct ResolvedDriver {
    pub driver: Arc<dyn Driver>,
    pub kind: Arc<RegisteredKind>,
}

impl ResolvedDriver {
    pub fn descriptor(&self) -> &Descriptor {
        self.kind.descriptor()
    }
}

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn ResourceStore>,
    modules: Arc<dyn ModuleStore>,
    registry: Arc<Registry>,
}

impl Resolver {
    pub fn new(store: Arc<dyn ResourceStore>, modules: Arc<dyn ModuleStore>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            modules,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Instantiate the driver of the module configured for `res.kind` in
    /// `res.project`. A missing module or unknown kind is `Invalid`.
    pub async fn driver_for(&self, res: &Resource) -> Result<ResolvedDriver> {
        let urn = module_urn(&res.project, &res.kind);
        let module = self.modules.get_module(&urn).await.map_err(|e| {
            if e.is_kind(ErrorKind::NotFound) {
                Error::invalid(format!(
                    "no module configured for kind '{}' in project '{}'",
                    res.kind, res.project
                ))
                .with_cause(e)
            } else {
                e.wrap("failed to load module").into_kind(ErrorKind::Internal)
            }
        })?;

        let (driver, kind) = self.registry.get_driver(&module).map_err(|e| {
            if e.is_kind(ErrorKind::NotFound) {
                e.wrap(format!("kind '{}' has no registered driver", res.kind))
                    .into_kind(ErrorKind::Invalid)
            } else {
                e
            }
        })?;
        debug!(urn = %res.urn, module = %module.urn, "Resolved driver");
        Ok(ResolvedDriver { driver, kind })
    }

    /// Resolve every dependency of `res`. Each must exist and be COMPLETED;
    /// every dependency the kind declares must be present with the declared
    /// kind.
    pub async fn expand(&self, res: Resource, descriptor: &Descriptor) -> Result<ExpandedResource> {
        if let Some((key, kind)) = descriptor
            .dependencies
            .iter()
            .find(|(key, _)| !res.spec.dependencies.contains_key(*key))
        {
            return Err(Error::invalid(format!(
                "missing dependency '{key}' of kind '{kind}'"
            )));
        }

        let mut expanded = ExpandedResource::new(res);
        let deps = expanded.resource.spec.dependencies.clone();
        for (key, urn) in deps {
            let dep = self.store.get_by_urn(&urn).await.map_err(|e| {
                if e.is_kind(ErrorKind::NotFound) {
                    Error::invalid(format!("dependency '{key}' ({urn}) does not exist"))
                } else {
                    e.wrap("failed to load dependency").into_kind(ErrorKind::Internal)
                }
            })?;

            if let Some(want) = descriptor.dependencies.get(&key).filter(|want| **want != dep.kind) {
                return Err(Error::invalid(format!(
                    "dependency '{key}' must be of kind '{want}', got '{}'",
                    dep.kind
                )));
            }
            if dep.state.status != Status::Completed {
                return Err(Error::invalid(format!(
                    "dependency '{key}' ({urn}) is not completed (status {})",
                    dep.state.status
                )));
            }

            expanded.dependencies.insert(
                key,
                ResolvedDependency {
                    kind: dep.kind,
                    output: dep.state.output,
                },
            );
        }
        Ok(expanded)
    }
}
