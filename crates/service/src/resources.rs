//! The resource state machine.
//!
//! Every write goes through a driver `plan`: the planned resource is stored
//! together with a sync job whenever it is left non-terminal, so a pending
//! resource never exists without work scheduled for it.

use std::sync::Arc;

use entropy_core::{
    Actor, Clock, Error, ErrorKind, Filter, Resource, Result, Revision, RevisionsSelector, Status,
    UpdateRequest,
};
use entropy_module::{
    ActionRequest, CREATE_ACTION, DELETE_ACTION, LogFilter, LogStream, UPDATE_ACTION, guarded,
};
use entropy_store::{Hook, ResourceStore, enqueue_sync};
use tracing::{debug, info, instrument};

use crate::resolver::Resolver;

/// Revision reason recorded for an action.
pub fn action_reason(action: &str) -> String {
    format!("action:{action}")
}

pub struct ResourceService {
    store: Arc<dyn ResourceStore>,
    resolver: Resolver,
    clock: Arc<dyn Clock>,
}

impl ResourceService {
    pub fn new(store: Arc<dyn ResourceStore>, resolver: Resolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            resolver,
            clock,
        }
    }

    pub async fn get_resource(&self, urn: &str) -> Result<Resource> {
        self.store.get_by_urn(urn).await
    }

    pub async fn list_resources(&self, filter: &Filter) -> Result<Vec<Resource>> {
        self.store
            .list(filter)
            .await
            .map_err(|e| e.wrap("failed to list resources").into_kind(ErrorKind::Internal))
    }

    /// Plan and store a new resource.
    #[instrument(skip(self, actor, res), fields(urn))]
    pub async fn create_resource(&self, actor: &Actor, mut res: Resource) -> Result<Resource> {
        res.validate()?;
        tracing::Span::current().record("urn", res.urn.as_str());

        let action = ActionRequest::new(CREATE_ACTION)
            .with_params(res.spec.configs.clone())
            .with_labels(res.labels.clone());
        self.exec_action(actor, res, action, true).await
    }

    /// Re-plan a resource with a new spec. Dependencies cannot change.
    #[instrument(skip(self, actor, req))]
    pub async fn update_resource(&self, actor: &Actor, urn: &str, req: UpdateRequest) -> Result<Resource> {
        let current = self.terminal_resource(urn).await?;
        if !req.spec.dependencies.is_empty() {
            return Err(Error::unsupported("updating dependencies is not supported"));
        }

        let action = ActionRequest::new(UPDATE_ACTION)
            .with_params(req.spec.configs)
            .with_labels(req.labels);
        self.exec_action(actor, current, action, false).await
    }

    /// Start tearing a resource down; the row goes away once its driver
    /// finishes.
    #[instrument(skip(self, actor))]
    pub async fn delete_resource(&self, actor: &Actor, urn: &str) -> Result<()> {
        let current = self.terminal_resource(urn).await?;
        self.exec_action(actor, current, ActionRequest::new(DELETE_ACTION), false)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, actor, action), fields(action = %action.name))]
    pub async fn apply_action(&self, actor: &Actor, urn: &str, action: ActionRequest) -> Result<Resource> {
        let current = self.terminal_resource(urn).await?;
        self.exec_action(actor, current, action, false).await
    }

    /// Stream logs from the resource's driver. `Unsupported` when the kind
    /// has no log capability.
    pub async fn get_log(&self, urn: &str, filter: LogFilter) -> Result<LogStream> {
        let res = self.store.get_by_urn(urn).await?;
        let resolved = self.resolver.driver_for(&res).await?;
        let Some(loggable) = resolved.driver.as_loggable() else {
            return Err(Error::unsupported(format!("kind '{}' does not support logs", res.kind)));
        };
        let expanded = self.resolver.expand(res, resolved.descriptor()).await?;
        loggable.log(expanded, filter).await
    }

    pub async fn get_revisions(&self, selector: &RevisionsSelector) -> Result<Vec<Revision>> {
        self.store.revisions(selector).await
    }

    /// Fetch a resource and refuse to act while it is still reconciling.
    async fn terminal_resource(&self, urn: &str) -> Result<Resource> {
        let res = self.store.get_by_urn(urn).await?;
        if !res.state.is_terminal() {
            return Err(Error::invalid(format!(
                "resource '{urn}' is still being reconciled (status {})",
                res.state.status
            )));
        }
        Ok(res)
    }

    async fn exec_action(
        &self,
        actor: &Actor,
        res: Resource,
        action: ActionRequest,
        is_create: bool,
    ) -> Result<Resource> {
        let actor = actor.require()?.to_string();

        let resolved = self.resolver.driver_for(&res).await?;
        resolved.kind.validate_action(&action)?;

        let original = res.clone();
        let expanded = self.resolver.expand(res, resolved.descriptor()).await?;

        let mut planned = guarded(resolved.driver.plan(expanded, action.clone()))
            .await
            .map_err(|e| {
                if e.is_kind(ErrorKind::Invalid) {
                    e
                } else {
                    e.wrap("driver failed to plan").into_kind(ErrorKind::Internal)
                }
            })?;

        let now = self.clock.now();
        planned.urn = original.urn.clone();
        planned.kind = original.kind.clone();
        planned.name = original.name.clone();
        planned.project = original.project.clone();
        planned.spec.dependencies = original.spec.dependencies.clone();
        if is_create {
            planned.created_at = now;
            planned.created_by.clone_from(&actor);
        } else {
            planned.created_at = original.created_at;
            planned.created_by = original.created_by;
        }
        planned.updated_at = now;
        planned.updated_by = actor;
        if !action.labels.is_empty() || action.name == UPDATE_ACTION {
            planned.labels = action.labels.clone();
        }
        if action.is_delete() {
            planned.state.status = Status::Deleted;
        }
        planned.validate()?;

        let hooks: Vec<Hook> = if planned.state.is_terminal() {
            Vec::new()
        } else {
            vec![enqueue_sync(
                planned.urn.clone(),
                planned.state.next_sync_at.unwrap_or(now),
            )]
        };
        debug!(urn = %planned.urn, status = %planned.state.status, scheduled = !hooks.is_empty(), "Planned");

        if is_create {
            self.store.create(&planned, hooks).await.map_err(|e| {
                if e.is_kind(ErrorKind::Conflict) {
                    Error::conflict(format!("resource with urn '{}' already exists", planned.urn))
                } else {
                    e.wrap("failed to create resource").into_kind(ErrorKind::Internal)
                }
            })?;
        } else {
            let reason = action_reason(&action.name);
            self.store
                .update(&planned, true, &reason, hooks)
                .await
                .map_err(|e| {
                    if e.is_kind(ErrorKind::NotFound) {
                        e
                    } else {
                        e.wrap("failed to update resource").into_kind(ErrorKind::Internal)
                    }
                })?;
        }

        info!(urn = %planned.urn, action = %action.name, status = %planned.state.status, "Action applied");
        Ok(planned)
    }
}
