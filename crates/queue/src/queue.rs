//! Lease-holding dequeue loop.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use entropy_core::{Clock, SystemClock};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobOutcome, JobStatus};

/// Lease timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Heartbeat period while a handler runs.
    pub refresh_interval: Duration,
    /// How far each heartbeat pushes the lease.
    pub extend_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(20),
            extend_interval: Duration::from_secs(30),
        }
    }
}

/// Job queue over a storage backend.
pub struct JobQueue<B: ?Sized> {
    backend: Arc<B>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl<B: ?Sized> Clone for JobQueue<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<B: QueueBackend + ?Sized> JobQueue<B> {
    pub fn new(backend: Arc<B>, config: QueueConfig) -> Self {
        Self {
            backend,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Insert jobs atomically.
    pub async fn enqueue(&self, jobs: &[Job]) -> QueueResult<()> {
        self.backend.insert(jobs).await?;
        debug!(count = jobs.len(), "Enqueued jobs");
        Ok(())
    }

    fn lease_from(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now + chrono::Duration::from_std(self.config.extend_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    /// Claim one eligible job of `kinds` and run `handler` on it while holding
    /// the lease.
    ///
    /// Returns `Ok(None)` when nothing is eligible, otherwise the job as
    /// persisted after the attempt. If a heartbeat fails the handler future is
    /// dropped and the lease error is returned; the job becomes claimable again
    /// once its lease expires.
    pub async fn dequeue<F, Fut>(&self, kinds: &[String], handler: F) -> QueueResult<Option<Job>>
    where
        F: FnOnce(Job) -> Fut + Send,
        Fut: Future<Output = JobOutcome> + Send,
    {
        let attempted_at = self.clock.now();
        let Some(job) = self
            .backend
            .claim(kinds, attempted_at, self.lease_from(attempted_at))
            .await?
        else {
            return Ok(None);
        };

        debug!(job_id = %job.id, kind = %job.kind, "Claimed job");

        let mut held = job.run_at;
        let work = AssertUnwindSafe(handler(job.clone())).catch_unwind();
        tokio::pin!(work);

        let period = self.config.refresh_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let outcome = loop {
            tokio::select! {
                result = &mut work => {
                    break result.unwrap_or_else(|payload| JobOutcome::Panicked(panic_message(payload.as_ref())));
                }
                _ = heartbeat.tick() => {
                    let until = self.lease_from(self.clock.now());
                    match self.backend.extend(job.id, held, until).await {
                        Ok(extended) => held = extended,
                        Err(err) => {
                            warn!(job_id = %job.id, error = %err, "Lease heartbeat failed, abandoning job");
                            return Err(err);
                        }
                    }
                }
            }
        };

        if let JobOutcome::Panicked(message) = &outcome {
            warn!(job_id = %job.id, panic = %message, "Job handler panicked");
        }

        let mut finished = job;
        finished.apply(outcome, attempted_at, self.clock.now());
        self.backend.finish(&finished, held).await?;

        info!(
            job_id = %finished.id,
            status = %finished.status,
            attempts = finished.attempts_done,
            "Job attempt finished"
        );
        Ok(Some(finished))
    }

    /// Delete DONE jobs last updated more than `retention` ago.
    pub async fn prune_done(&self, retention: Duration) -> QueueResult<usize> {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let pruned = self.backend.prune(JobStatus::Done, cutoff).await?;
        if pruned > 0 {
            debug!(pruned, "Pruned finished jobs");
        }
        Ok(pruned)
    }

    /// Look a job up by id.
    pub async fn get(&self, id: ulid::Ulid) -> QueueResult<Job> {
        self.backend
            .get(id)
            .await?
            .ok_or_else(|| QueueError::backend(format!("job '{id}' not found")))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(20));
        assert_eq!(config.extend_interval, Duration::from_secs(30));
    }
}
