//! Storage seam for the job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::error::QueueResult;
use crate::job::{Job, JobStatus};

/// Durable storage for jobs.
///
/// While a worker holds a job its `run_at` carries the lease expiry; every
/// lease-holder operation compare-and-sets on that value, so a worker that
/// lost its lease cannot overwrite the row.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert all jobs or none.
    async fn insert(&self, jobs: &[Job]) -> QueueResult<()>;

    /// Claim the next eligible job and move its `run_at` to `lease_until`.
    async fn claim(
        &self,
        kinds: &[String],
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<Option<Job>>;

    /// Extend a held lease. Returns the stored expiry.
    async fn extend(
        &self,
        id: Ulid,
        held_until: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>>;

    /// Persist the final state of an attempt and release the lease.
    async fn finish(&self, job: &Job, held_until: DateTime<Utc>) -> QueueResult<()>;

    async fn get(&self, id: Ulid) -> QueueResult<Option<Job>>;

    /// All jobs of a kind, oldest first.
    async fn list(&self, kind: &str) -> QueueResult<Vec<Job>>;

    /// Delete jobs in `status` last updated before `before`. Returns how many
    /// were removed.
    async fn prune(&self, status: JobStatus, before: DateTime<Utc>) -> QueueResult<usize>;
}
