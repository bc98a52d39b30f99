//! One sync pass over one claimed resource.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entropy_core::{Clock, Error, ErrorKind, Resource, Result, State, Status, SyncResult};
use entropy_module::guarded;
use entropy_service::Resolver;
use entropy_store::{PendingHandler, PendingOutcome, ResourceStore, enqueue_sync};
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;

/// Result of one [`Syncer::sync_one`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPass {
    /// The resource was claimed and one step ran.
    Synced,
    /// Another claim is still held; the pass must be retried.
    Held,
    /// Missing or not due; nothing to do.
    Idle,
}

/// Drives claimed resources one step closer to their planned state.
pub struct Syncer {
    store: Arc<dyn ResourceStore>,
    resolver: Resolver,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl Syncer {
    pub fn new(store: Arc<dyn ResourceStore>, resolver: Resolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            resolver,
            clock,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Claim `urn` if it is due and run one sync step on it.
    #[instrument(skip(self))]
    pub async fn sync_one(&self, urn: &str) -> Result<SyncPass> {
        if self.store.do_pending(Some(urn), self).await? {
            return Ok(SyncPass::Synced);
        }
        if self.store.is_claimed(urn).await? {
            debug!(urn = %urn, "Resource claimed elsewhere");
            return Ok(SyncPass::Held);
        }
        Ok(SyncPass::Idle)
    }

    async fn step(&self, res: &Resource) -> Result<State> {
        let resolved = self.resolver.driver_for(res).await?;
        let expanded = self.resolver.expand(res.clone(), resolved.descriptor()).await?;
        guarded(resolved.driver.sync(expanded)).await
    }

    fn failed_state(&self, previous: &State, err: &Error, now: DateTime<Utc>) -> State {
        let mut state = previous.clone_state();
        state.sync_result.last_error = Some(err.to_string());

        if err.is_kind(ErrorKind::Invalid) {
            state.status = Status::Error;
            state.next_sync_at = None;
            return state;
        }

        let delay = err
            .retry_after()
            .unwrap_or_else(|| self.backoff.delay(previous.sync_result.retries));
        state.sync_result.retries = previous.sync_result.retries.saturating_add(1);
        state.next_sync_at = Some(
            now.checked_add_signed(to_chrono(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        state
    }
}

#[async_trait]
impl PendingHandler for Syncer {
    async fn handle(&self, res: Resource) -> Result<PendingOutcome> {
        let now = self.clock.now();
        let previous = res.state.clone_state();

        let state = match self.step(&res).await {
            Ok(mut state) => {
                if previous.in_deletion() && state.is_terminal() {
                    info!(urn = %res.urn, "Deletion finished, removing resource");
                    return Ok(PendingOutcome::Delete { hooks: vec![] });
                }
                state.sync_result = SyncResult::default();
                state
            }
            Err(err) => {
                let state = self.failed_state(&previous, &err, now);
                warn!(
                    urn = %res.urn,
                    error = %err,
                    status = %state.status,
                    retries = state.sync_result.retries,
                    "Sync step failed"
                );
                state
            }
        };

        let mut updated = res;
        updated.state = state;

        let mut hooks = Vec::new();
        if !updated.state.is_terminal() || updated.state.next_sync_at.is_some() {
            let run_at = updated.state.next_sync_at.unwrap_or(now);
            hooks.push(enqueue_sync(updated.urn.clone(), run_at));
        }

        debug!(
            urn = %updated.urn,
            status = %updated.state.status,
            follow_up = !hooks.is_empty(),
            "Sync step saved"
        );
        Ok(PendingOutcome::Save {
            resource: updated,
            hooks,
        })
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
}
