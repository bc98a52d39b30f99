//! Job-driven sync worker pool.

use std::sync::Arc;
use std::time::Duration;

use entropy_core::ErrorKind;
use entropy_queue::{Job, JobOutcome, JobQueue, QueueBackend, QueueConfig};
use entropy_store::{SYNC_JOB_KIND, SyncJobPayload};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::syncer::{SyncPass, Syncer};

/// Lower bound on the idle poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on how long DONE jobs are kept.
pub const MAX_JOB_RETENTION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for the sync worker pool.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Concurrent dequeue loops.
    pub worker_count: usize,
    /// Sleep between polls when the queue has nothing eligible.
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub queue: QueueConfig,
    /// How long DONE jobs are kept. Zero disables the sweep.
    pub job_retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval: Duration::from_secs(1),
            backoff: Backoff::default(),
            queue: QueueConfig::default(),
            job_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub const fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(Error::invalid_config(format!(
                "poll interval must be at least {}ms",
                MIN_POLL_INTERVAL.as_millis()
            )));
        }
        if self.backoff.start.is_zero() || self.backoff.ceiling < self.backoff.start {
            return Err(Error::invalid_config(
                "backoff start must be positive and not above the ceiling",
            ));
        }
        if self.job_retention > MAX_JOB_RETENTION {
            return Err(Error::invalid_config("job retention must be at most 365 days"));
        }
        if self.queue.refresh_interval.is_zero() {
            return Err(Error::invalid_config("lease refresh interval must be positive"));
        }
        if self.queue.refresh_interval >= self.queue.extend_interval {
            return Err(Error::invalid_config(format!(
                "lease refresh interval ({}ms) must be shorter than the extend interval ({}ms)",
                self.queue.refresh_interval.as_millis(),
                self.queue.extend_interval.as_millis()
            )));
        }
        Ok(())
    }
}

/// Runs sync jobs until told to stop.
pub struct SyncWorker {
    syncer: Arc<Syncer>,
    queue: Arc<JobQueue<dyn QueueBackend>>,
    config: SyncConfig,
}

impl SyncWorker {
    pub fn new(syncer: Syncer, backend: Arc<dyn QueueBackend>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            syncer: Arc::new(syncer.with_backoff(config.backoff)),
            queue: Arc::new(JobQueue::new(backend, config.queue)),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run `worker_count` dequeue loops until `shutdown` flips to true.
    ///
    /// A loop finishes the job in hand before it observes the signal.
    pub async fn run_sync(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            workers = self.config.worker_count,
            poll_ms = self.config.poll_interval.as_millis(),
            "Starting sync workers"
        );

        let mut tasks = JoinSet::new();
        for id in 0..self.config.worker_count {
            tasks.spawn(worker_loop(
                id,
                Arc::clone(&self.syncer),
                Arc::clone(&self.queue),
                self.config.poll_interval,
                shutdown.clone(),
            ));
        }
        if !self.config.job_retention.is_zero() {
            tasks.spawn(retention_loop(
                Arc::clone(&self.queue),
                self.config.job_retention,
                shutdown.clone(),
            ));
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Sync worker task aborted");
                failure.get_or_insert_with(|| Error::worker_failed(e.to_string()));
            }
        }

        info!("Sync workers stopped");
        failure.map_or(Ok(()), Err)
    }
}

async fn worker_loop(
    id: usize,
    syncer: Arc<Syncer>,
    queue: Arc<JobQueue<dyn QueueBackend>>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let kinds = [SYNC_JOB_KIND.to_string()];
    debug!(worker = id, "Sync worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let handler_syncer = Arc::clone(&syncer);
        let processed = queue
            .dequeue(&kinds, move |job| async move {
                process(&handler_syncer, job, poll_interval).await
            })
            .await;

        match processed {
            Ok(Some(job)) => {
                debug!(worker = id, job = %job.id, status = ?job.status, "Processed sync job");
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(worker = id, error = %e, "Failed to dequeue sync job"),
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!(worker = id, "Sync worker exiting");
}

/// Deletes DONE jobs older than `retention`, once per `retention`.
async fn retention_loop(
    queue: Arc<JobQueue<dyn QueueBackend>>,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + retention, retention);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = queue.prune_done(retention).await {
                    warn!(error = %e, "Failed to prune finished jobs");
                }
            }
        }
    }
}

/// `held_retry` is how long to wait before retrying a resource whose claim is
/// held elsewhere.
async fn process(syncer: &Syncer, job: Job, held_retry: Duration) -> JobOutcome {
    let payload = match SyncJobPayload::from_job(&job) {
        Ok(payload) => payload,
        Err(e) => return JobOutcome::failed(e),
    };

    match syncer.sync_one(&payload.resource_urn).await {
        Ok(SyncPass::Held) => JobOutcome::retry(
            held_retry,
            format!("resource '{}' is claimed by another worker", payload.resource_urn),
        ),
        Ok(pass) => JobOutcome::Done(json!({
            "resource_urn": payload.resource_urn,
            "claimed": pass == SyncPass::Synced,
        })),
        Err(e) if e.is_kind(ErrorKind::Invalid) && !e.is_retryable() => JobOutcome::failed(e),
        Err(e) => {
            let after = e.retry_after().unwrap_or(syncer.backoff().start);
            JobOutcome::retry(after, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = SyncConfig::new().with_poll_interval(Duration::from_millis(10));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = SyncConfig::new().with_worker_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_lease_refresh_rejected() {
        let config = SyncConfig::new().with_queue(QueueConfig {
            refresh_interval: Duration::ZERO,
            extend_interval: Duration::from_secs(30),
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_lease_refresh_not_below_extend_rejected() {
        let slower = SyncConfig::new().with_queue(QueueConfig {
            refresh_interval: Duration::from_secs(60),
            extend_interval: Duration::from_secs(5),
        });
        let equal = SyncConfig::new().with_queue(QueueConfig {
            refresh_interval: Duration::from_secs(30),
            extend_interval: Duration::from_secs(30),
        });
        assert!(slower.validate().is_err());
        assert!(equal.validate().is_err());
    }
}
