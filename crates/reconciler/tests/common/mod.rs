#![allow(clippy::unwrap_used, clippy::panic, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use entropy_core::{Clock, Module, Resource, Result, State, Status};
use entropy_module::{ActionRequest, Descriptor, Driver, ExpandedResource, Registry};
use entropy_queue::{Job, MemoryBackend, QueueBackend};
use entropy_reconciler::Syncer;
use entropy_service::Resolver;
use entropy_store::{
    ClaimConfig, MemoryStore, ModuleStore, ResourceStore, SYNC_JOB_KIND, StoreConfig, SurrealStore,
    enqueue_sync,
};
use serde_json::{Value, json};

type Script = Box<dyn Fn(usize, &Resource) -> Result<State> + Send + Sync>;

/// Driver whose sync outcome is a function of the call number.
pub struct ScriptedDriver {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new(script: impl Fn(usize, &Resource) -> Result<State> + Send + Sync + 'static) -> Arc<Self> {
        Self::slow(Duration::ZERO, script)
    }

    pub fn slow(
        delay: Duration,
        script: impl Fn(usize, &Resource) -> Result<State> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn plan(&self, expanded: ExpandedResource, _action: ActionRequest) -> Result<Resource> {
        Ok(expanded.resource)
    }

    async fn sync(&self, expanded: ExpandedResource) -> Result<State> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.script)(call, &expanded.resource);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn output(&self, expanded: ExpandedResource) -> Result<Value> {
        Ok(expanded.resource.state.output)
    }
}

/// State with the given status and nothing else.
pub fn state(status: Status) -> State {
    State {
        status,
        ..State::default()
    }
}

pub fn frozen() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<dyn ResourceStore>,
    pub queue: Arc<dyn QueueBackend>,
    pub resolver: Resolver,
    pub clock: Arc<dyn Clock>,
    pub driver: Arc<ScriptedDriver>,
}

impl Harness {
    /// Harness over the in-memory store.
    pub async fn new(driver: Arc<ScriptedDriver>, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryStore::new(Arc::clone(&queue)).with_clock(Arc::clone(&clock)));
        Self::build(driver, clock, store.clone(), store, queue).await
    }

    /// Harness over an in-memory SurrealDB store with short claims. The store
    /// handle is returned for direct row access.
    pub async fn surreal(driver: Arc<ScriptedDriver>, clock: Arc<dyn Clock>) -> (Self, Arc<SurrealStore>) {
        let store = SurrealStore::connect(StoreConfig::in_memory())
            .await
            .unwrap()
            .with_clock(Arc::clone(&clock))
            .with_claim_config(ClaimConfig {
                ttl: Duration::from_secs(2),
                refresh: Duration::from_millis(500),
            });
        store.initialize_schema().await.unwrap();
        let queue = Arc::new(store.queue_backend());
        let store = Arc::new(store);
        let harness = Self::build(driver, clock, store.clone(), store.clone(), queue).await;
        (harness, store)
    }

    async fn build(
        driver: Arc<ScriptedDriver>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ResourceStore>,
        modules: Arc<dyn ModuleStore>,
        queue: Arc<dyn QueueBackend>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let shared = Arc::clone(&driver);
        registry
            .register(Descriptor::new(
                "mock",
                Arc::new(move |_: &Value| Ok(Arc::clone(&shared) as Arc<dyn Driver>)),
            ))
            .unwrap();

        let mut module = Module::new("project", "mock", json!({}));
        module.created_at = clock.now();
        module.updated_at = clock.now();
        modules.create_module(&module).await.unwrap();

        let resolver = Resolver::new(Arc::clone(&store), modules, registry);
        Self {
            store,
            queue,
            resolver,
            clock,
            driver,
        }
    }

    pub fn syncer(&self) -> Syncer {
        Syncer::new(Arc::clone(&self.store), self.resolver.clone(), Arc::clone(&self.clock))
    }

    /// Insert a resource in `status` together with a sync job due now.
    pub async fn seed(&self, name: &str, status: Status) -> Resource {
        self.seed_resource(Resource::new("mock", "project", name).with_status(status))
            .await
    }

    pub async fn seed_resource(&self, mut res: Resource) -> Resource {
        res.validate().unwrap();
        let hooks = vec![enqueue_sync(res.urn.clone(), self.clock.now())];
        self.store.create(&res, hooks).await.unwrap();
        res
    }

    pub async fn get(&self, urn: &str) -> Resource {
        self.store.get_by_urn(urn).await.unwrap()
    }

    pub async fn sync_jobs(&self) -> Vec<Job> {
        self.queue.list(SYNC_JOB_KIND).await.unwrap()
    }
}
