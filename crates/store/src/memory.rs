//! In-memory store.
//!
//! Writes and their hook jobs are applied under a single lock, so a reader
//! never sees a pending resource without its sync job.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use entropy_core::{
    Clock, Error, Filter, Module, Resource, Result, Revision, RevisionsSelector, SystemClock,
};
use entropy_queue::{MemoryBackend, QueueBackend};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PersistenceError;
use crate::hooks::{Hook, run_hooks};
use crate::store::{
    CREATE_REASON, ModuleStore, PendingHandler, PendingOutcome, ResourceStore, revision_of,
};

#[derive(Debug, Default)]
struct Tables {
    resources: BTreeMap<String, Resource>,
    revisions: Vec<Revision>,
    modules: BTreeMap<String, Module>,
    last_revision_id: i64,
}

impl Tables {
    fn push_revision(&mut self, resource: &Resource, reason: &str) {
        self.last_revision_id += 1;
        self.revisions
            .push(revision_of(resource, self.last_revision_id, reason));
    }
}

type ClaimSet = Arc<StdMutex<HashSet<String>>>;

/// Releases a claim when dropped.
struct ClaimGuard {
    claims: ClaimSet,
    urn: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.urn);
    }
}

/// Resource and module store held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    claims: ClaimSet,
    queue: Arc<MemoryBackend>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Store whose hook jobs land in `queue`.
    pub fn new(queue: Arc<MemoryBackend>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            claims: Arc::new(StdMutex::new(HashSet::new())),
            queue,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<MemoryBackend> {
        &self.queue
    }

    async fn commit_jobs(&self, hooks: Vec<Hook>) -> Result<()> {
        let jobs = run_hooks(hooks)?;
        if !jobs.is_empty() {
            self.queue.insert(&jobs).await?;
        }
        Ok(())
    }

    fn try_claim(&self, resource: &Resource) -> Option<ClaimGuard> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.insert(resource.urn.clone()).then(|| ClaimGuard {
            claims: Arc::clone(&self.claims),
            urn: resource.urn.clone(),
        })
    }
}

fn not_found(urn: &str) -> Error {
    PersistenceError::not_found("resource", urn).into()
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_by_urn(&self, urn: &str) -> Result<Resource> {
        self.tables
            .lock()
            .await
            .resources
            .get(urn)
            .cloned()
            .ok_or_else(|| not_found(urn))
    }

    async fn list(&self, filter: &Filter) -> Result<Vec<Resource>> {
        Ok(self
            .tables
            .lock()
            .await
            .resources
            .values()
            .filter(|res| filter.matches(res))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: &Resource, hooks: Vec<Hook>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.resources.contains_key(&resource.urn) {
            return Err(PersistenceError::already_exists("resource", &resource.urn).into());
        }
        self.commit_jobs(hooks).await?;

        tables.resources.insert(resource.urn.clone(), resource.clone());
        tables.push_revision(resource, CREATE_REASON);
        debug!(urn = %resource.urn, "Created resource");
        Ok(())
    }

    async fn update(
        &self,
        resource: &Resource,
        save_revision: bool,
        reason: &str,
        hooks: Vec<Hook>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.resources.contains_key(&resource.urn) {
            return Err(not_found(&resource.urn));
        }
        self.commit_jobs(hooks).await?;

        tables.resources.insert(resource.urn.clone(), resource.clone());
        if save_revision {
            tables.push_revision(resource, reason);
        }
        Ok(())
    }

    async fn delete(&self, urn: &str, hooks: Vec<Hook>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.resources.contains_key(urn) {
            return Err(not_found(urn));
        }
        self.commit_jobs(hooks).await?;

        tables.resources.remove(urn);
        tables.revisions.retain(|rev| rev.urn != urn);
        debug!(urn = %urn, "Deleted resource");
        Ok(())
    }

    async fn revisions(&self, selector: &RevisionsSelector) -> Result<Vec<Revision>> {
        let tables = self.tables.lock().await;
        let mut revisions: Vec<Revision> = tables
            .revisions
            .iter()
            .filter(|rev| rev.urn == selector.urn)
            .cloned()
            .collect();
        revisions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(revisions)
    }

    async fn do_pending(&self, urn: Option<&str>, handler: &dyn PendingHandler) -> Result<bool> {
        let claimed = {
            let tables = self.tables.lock().await;
            let now = self.clock.now();
            let mut due = tables
                .resources
                .values()
                .filter(|res| urn.is_none_or(|u| res.urn == u))
                .filter(|res| res.state.is_due(now))
                .collect::<Vec<_>>();
            due.sort_by_key(|res| (res.state.next_sync_at, res.urn.clone()));
            due.into_iter()
                .find_map(|res| self.try_claim(res).map(|guard| (res.clone(), guard)))
        };

        let Some((resource, _guard)) = claimed else {
            return Ok(false);
        };

        let claimed_urn = resource.urn.clone();
        match handler.handle(resource).await? {
            PendingOutcome::Release => {}
            PendingOutcome::Save { resource, hooks } => {
                self.update(&resource, false, "", hooks).await?;
            }
            PendingOutcome::Delete { hooks } => {
                self.delete(&claimed_urn, hooks).await?;
            }
        }
        Ok(true)
    }

    async fn is_claimed(&self, urn: &str) -> Result<bool> {
        Ok(self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(urn))
    }
}

#[async_trait]
impl ModuleStore for MemoryStore {
    async fn get_module(&self, urn: &str) -> Result<Module> {
        self.tables
            .lock()
            .await
            .modules
            .get(urn)
            .cloned()
            .ok_or_else(|| PersistenceError::not_found("module", urn).into())
    }

    async fn list_modules(&self, project: Option<&str>) -> Result<Vec<Module>> {
        Ok(self
            .tables
            .lock()
            .await
            .modules
            .values()
            .filter(|m| project.is_none_or(|p| m.project == p))
            .cloned()
            .collect())
    }

    async fn create_module(&self, module: &Module) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.modules.contains_key(&module.urn) {
            return Err(PersistenceError::already_exists("module", &module.urn).into());
        }
        tables.modules.insert(module.urn.clone(), module.clone());
        Ok(())
    }

    async fn update_module(&self, module: &Module) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tables.modules.get_mut(&module.urn) {
            Some(stored) => {
                *stored = module.clone();
                Ok(())
            }
            None => Err(PersistenceError::not_found("module", &module.urn).into()),
        }
    }

    async fn delete_module(&self, urn: &str) -> Result<()> {
        self.tables
            .lock()
            .await
            .modules
            .remove(urn)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::not_found("module", urn).into())
    }
}
