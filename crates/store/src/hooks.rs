//! Mutation hooks: callbacks that run inside a store write and may add
//! follow-up jobs to the same transaction.

use chrono::{DateTime, Utc};
use entropy_core::{ErrorContext, Result};
use entropy_queue::Job;
use serde::{Deserialize, Serialize};

/// Job kind the sync worker consumes.
pub const SYNC_JOB_KIND: &str = "sync_resource";

/// Write-scoped context handed to hooks.
pub trait TxContext: Send {
    /// Insert `job` atomically with the surrounding write.
    fn enqueue(&mut self, job: Job);
}

/// A mutation hook. An error aborts the write.
pub type Hook = Box<dyn FnOnce(&mut dyn TxContext) -> Result<()> + Send>;

/// Collects the jobs produced by a write's hooks.
#[derive(Debug, Default)]
pub struct TxBuffer {
    jobs: Vec<Job>,
}

impl TxContext for TxBuffer {
    fn enqueue(&mut self, job: Job) {
        self.jobs.push(job);
    }
}

/// Run hooks in order and return the jobs to commit with the write.
pub fn run_hooks(hooks: Vec<Hook>) -> Result<Vec<Job>> {
    let mut buffer = TxBuffer::default();
    for hook in hooks {
        hook(&mut buffer)?;
    }
    Ok(buffer.jobs)
}

/// Payload of a sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobPayload {
    pub resource_urn: String,
}

impl SyncJobPayload {
    pub fn from_job(job: &Job) -> Result<Self> {
        serde_json::from_value(job.payload.clone())
            .invalid("malformed sync job payload")
    }
}

/// Build a sync job for `urn` that becomes eligible at `run_at`.
pub fn sync_job(urn: &str, run_at: DateTime<Utc>) -> Result<Job> {
    let payload = serde_json::to_value(SyncJobPayload {
        resource_urn: urn.to_string(),
    })
    .internal("failed to encode sync job payload")?;
    Ok(Job::new(SYNC_JOB_KIND, payload).with_run_at(run_at))
}

/// Hook that enqueues a sync job for `urn` at `run_at`.
pub fn enqueue_sync(urn: impl Into<String>, run_at: DateTime<Utc>) -> Hook {
    let urn = urn.into();
    Box::new(move |tx: &mut dyn TxContext| {
        tx.enqueue(sync_job(&urn, run_at)?);
        Ok(())
    })
}
