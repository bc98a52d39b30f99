//! Store contracts.

use async_trait::async_trait;
use entropy_core::{Filter, Module, Resource, Result, Revision, RevisionsSelector};

use crate::hooks::Hook;

/// Reason recorded on the revision written by `create`.
pub const CREATE_REASON: &str = "action:create";

/// What to do with a claimed pending resource once the handler returns.
pub enum PendingOutcome {
    /// Release the claim without writing.
    Release,
    /// Persist the resource (no revision) and run the hooks in the same write.
    Save { resource: Resource, hooks: Vec<Hook> },
    /// Physically remove the claimed resource.
    Delete { hooks: Vec<Hook> },
}

impl std::fmt::Debug for PendingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Release => f.write_str("Release"),
            Self::Save { resource, hooks } => f
                .debug_struct("Save")
                .field("urn", &resource.urn)
                .field("status", &resource.state.status)
                .field("hooks", &hooks.len())
                .finish(),
            Self::Delete { hooks } => f.debug_struct("Delete").field("hooks", &hooks.len()).finish(),
        }
    }
}

/// Callback invoked by [`ResourceStore::do_pending`] while the claim is held.
#[async_trait]
pub trait PendingHandler: Send + Sync {
    async fn handle(&self, resource: Resource) -> Result<PendingOutcome>;
}

/// Durable persistence of resources and their revisions.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource; `NotFound` on miss.
    async fn get_by_urn(&self, urn: &str) -> Result<Resource>;

    /// Resources matching every set field of `filter`.
    async fn list(&self, filter: &Filter) -> Result<Vec<Resource>>;

    /// Insert a resource together with its first revision. `Conflict` when the
    /// URN is taken. Hooks run before commit.
    async fn create(&self, resource: &Resource, hooks: Vec<Hook>) -> Result<()>;

    /// Replace a resource, optionally appending a revision. `NotFound` when the
    /// URN is absent.
    async fn update(
        &self,
        resource: &Resource,
        save_revision: bool,
        reason: &str,
        hooks: Vec<Hook>,
    ) -> Result<()>;

    /// Remove a resource and its revisions. `NotFound` when absent.
    async fn delete(&self, urn: &str, hooks: Vec<Hook>) -> Result<()>;

    /// Revisions of a URN, newest first.
    async fn revisions(&self, selector: &RevisionsSelector) -> Result<Vec<Revision>>;

    /// Claim a due resource and hand it to `handler`.
    ///
    /// With `urn` set only that resource is considered, and only if it is
    /// still due. Otherwise the next due resource is picked. At most one claim
    /// per URN exists at any time. Returns `false` when nothing was claimed.
    async fn do_pending(&self, urn: Option<&str>, handler: &dyn PendingHandler) -> Result<bool>;

    /// Whether an unexpired claim on `urn` is held, by this process or another.
    async fn is_claimed(&self, urn: &str) -> Result<bool>;
}

/// CRUD persistence for module rows.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn get_module(&self, urn: &str) -> Result<Module>;

    /// All modules, optionally limited to one project.
    async fn list_modules(&self, project: Option<&str>) -> Result<Vec<Module>>;

    async fn create_module(&self, module: &Module) -> Result<()>;

    async fn update_module(&self, module: &Module) -> Result<()>;

    async fn delete_module(&self, urn: &str) -> Result<()>;
}

/// Build the revision a write appends.
pub fn revision_of(resource: &Resource, id: i64, reason: &str) -> Revision {
    Revision {
        id,
        urn: resource.urn.clone(),
        reason: reason.to_string(),
        labels: resource.labels.clone(),
        created_at: resource.updated_at,
        created_by: resource.updated_by.clone(),
        spec: resource.spec.clone(),
    }
}
