#![allow(clippy::unwrap_used, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use entropy_core::{Actor, Error, FixedClock, Module, Resource, Result, State, Status};
use entropy_module::{
    ActionDesc, ActionRequest, Descriptor, Driver, ExpandedResource, Registry,
};
use entropy_queue::{Job, MemoryBackend, QueueBackend};
use entropy_service::{ModuleService, ResourceService, Resolver};
use entropy_store::{MemoryStore, ResourceStore, SYNC_JOB_KIND};
use serde_json::{Value, json};

/// Driver whose plan outcome is set by the test.
pub struct MockDriver {
    pub plan_status: Mutex<Status>,
    pub plan_error: Mutex<Option<Error>>,
    pub plans: AtomicUsize,
    pub seen_dependencies: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new(plan_status: Status) -> Arc<Self> {
        Arc::new(Self {
            plan_status: Mutex::new(plan_status),
            plan_error: Mutex::new(None),
            plans: AtomicUsize::new(0),
            seen_dependencies: Mutex::new(Vec::new()),
        })
    }

    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    pub fn fail_plan(&self, err: Error) {
        *self.plan_error.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn plan(&self, expanded: ExpandedResource, action: ActionRequest) -> Result<Resource> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        *self.seen_dependencies.lock().unwrap() = expanded.dependencies.keys().cloned().collect();
        if let Some(err) = self.plan_error.lock().unwrap().clone() {
            return Err(err);
        }

        let mut res = expanded.resource;
        if !action.params.is_null() {
            res.spec.configs = action.params;
        }
        res.state = State {
            status: *self.plan_status.lock().unwrap(),
            output: json!({"planned_by": action.name}),
            ..State::default()
        };
        Ok(res)
    }

    async fn sync(&self, expanded: ExpandedResource) -> Result<State> {
        Ok(State {
            status: Status::Completed,
            ..expanded.resource.state
        })
    }

    async fn output(&self, _expanded: ExpandedResource) -> Result<Value> {
        Ok(json!({"ok": true}))
    }
}

pub fn frozen() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn actor() -> Actor {
    Actor::new("john.doe@example.com")
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryBackend>,
    pub clock: FixedClock,
    pub mock: Arc<MockDriver>,
    pub resources: ResourceService,
    pub modules: ModuleService,
}

impl Harness {
    pub async fn new(plan_status: Status) -> Self {
        let clock = FixedClock::new(frozen());
        let queue = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryStore::new(Arc::clone(&queue)).with_clock(Arc::new(clock.clone())));
        let mock = MockDriver::new(plan_status);

        let registry = Arc::new(Registry::new());
        let shared = Arc::clone(&mock);
        registry
            .register(
                Descriptor::new(
                    "mock",
                    Arc::new(move |_: &Value| Ok(Arc::clone(&shared) as Arc<dyn Driver>)),
                )
                .with_action(ActionDesc::new("create", "create"))
                .with_action(ActionDesc::new("update", "update"))
                .with_action(ActionDesc::new("delete", "delete"))
                .with_action(ActionDesc::new("bump", "bump the counter").with_schema(
                    r#"{"type":"object","required":["by"],"properties":{"by":{"type":"integer"}}}"#,
                )),
            )
            .unwrap();

        let resolver = Resolver::new(store.clone(), store.clone(), Arc::clone(&registry));
        let resources = ResourceService::new(store.clone(), resolver, Arc::new(clock.clone()));
        let modules = ModuleService::new(store.clone(), registry, Arc::new(clock.clone()));

        modules
            .create_module(Module::new("project", "mock", json!({})))
            .await
            .unwrap();

        Self {
            store,
            queue,
            clock,
            mock,
            resources,
            modules,
        }
    }

    /// Put a resource straight into the store, bypassing the service.
    pub async fn seed(&self, name: &str, status: Status) -> Resource {
        let mut res = Resource::new("mock", "project", name).with_status(status);
        res.validate().unwrap();
        res.state.output = json!({"seeded": name});
        self.store.create(&res, Vec::new()).await.unwrap();
        res
    }

    pub async fn sync_jobs(&self) -> Vec<Job> {
        self.queue.list(SYNC_JOB_KIND).await.unwrap()
    }
}
