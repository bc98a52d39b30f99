//! Wiring of stores, registry, services and the sync worker.

use std::sync::Arc;

use entropy_core::{Clock, Result};
use entropy_drivers::{ClusterClients, register_builtin};
use entropy_module::Registry;
use entropy_queue::QueueBackend;
use entropy_reconciler::{SyncConfig, SyncWorker, Syncer};
use entropy_service::{ModuleService, ResourceService, Resolver};
use entropy_store::{ModuleStore, ResourceStore};
use tracing::info;

use crate::server::AppState;

/// Everything a running process needs.
pub struct App {
    pub state: AppState,
    pub worker: SyncWorker,
}

impl App {
    /// Build the services over the given stores. The built-in kinds are
    /// registered with `clients`.
    pub fn assemble(
        resources: Arc<dyn ResourceStore>,
        modules: Arc<dyn ModuleStore>,
        queue: Arc<dyn QueueBackend>,
        clients: Arc<dyn ClusterClients>,
        clock: Arc<dyn Clock>,
        sync: SyncConfig,
    ) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        register_builtin(&registry, clients, Arc::clone(&clock))?;
        Self::with_registry(resources, modules, queue, registry, clock, sync)
    }

    /// Build the services around an already populated registry.
    pub fn with_registry(
        resources: Arc<dyn ResourceStore>,
        modules: Arc<dyn ModuleStore>,
        queue: Arc<dyn QueueBackend>,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
        sync: SyncConfig,
    ) -> Result<Self> {
        info!(kinds = ?registry.kinds()?, "Registered kinds");

        let resolver = Resolver::new(Arc::clone(&resources), Arc::clone(&modules), Arc::clone(&registry));
        let syncer = Syncer::new(Arc::clone(&resources), resolver.clone(), Arc::clone(&clock));
        let worker = SyncWorker::new(syncer, queue, sync)?;

        let state = AppState {
            resources: Arc::new(ResourceService::new(resources, resolver, Arc::clone(&clock))),
            modules: Arc::new(ModuleService::new(modules, Arc::clone(&registry), clock)),
            registry,
        };
        Ok(Self { state, worker })
    }
}
