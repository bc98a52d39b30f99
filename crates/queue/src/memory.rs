//! In-process queue backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobStatus};

/// Queue backend keeping jobs in memory. Used by tests and `mem://` deployments.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    jobs: Mutex<BTreeMap<Ulid, Job>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs still pending.
    pub async fn pending_count(&self) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .count()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn insert(&self, jobs: &[Job]) -> QueueResult<()> {
        let mut guard = self.jobs.lock().await;
        if let Some(dup) = jobs.iter().find(|job| guard.contains_key(&job.id)) {
            return Err(QueueError::DuplicateJob {
                id: dup.id.to_string(),
            });
        }
        for job in jobs {
            guard.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn claim(
        &self,
        kinds: &[String],
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let mut guard = self.jobs.lock().await;
        let next = guard
            .values_mut()
            .filter(|job| job.is_eligible(kinds, now))
            .min_by_key(|job| (job.run_at, job.id));

        Ok(next.map(|job| {
            job.run_at = lease_until;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn extend(
        &self,
        id: Ulid,
        held_until: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        let mut guard = self.jobs.lock().await;
        match guard.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending && job.run_at == held_until => {
                job.run_at = until;
                Ok(until)
            }
            _ => Err(QueueError::lease_lost(id)),
        }
    }

    async fn finish(&self, job: &Job, held_until: DateTime<Utc>) -> QueueResult<()> {
        let mut guard = self.jobs.lock().await;
        match guard.get_mut(&job.id) {
            Some(stored) if stored.status == JobStatus::Pending && stored.run_at == held_until => {
                *stored = job.clone();
                Ok(())
            }
            _ => Err(QueueError::lease_lost(job.id)),
        }
    }

    async fn get(&self, id: Ulid) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn list(&self, kind: &str) -> QueueResult<Vec<Job>> {
        let guard = self.jobs.lock().await;
        let mut jobs: Vec<Job> = guard.values().filter(|job| job.kind == kind).cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    async fn prune(&self, status: JobStatus, before: DateTime<Utc>) -> QueueResult<usize> {
        let mut guard = self.jobs.lock().await;
        let total = guard.len();
        guard.retain(|_, job| job.status != status || job.updated_at >= before);
        Ok(total - guard.len())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn kinds() -> Vec<String> {
        vec!["k".to_string()]
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let backend = MemoryBackend::new();
        let first = Job::new("k", json!(1));
        backend.insert(std::slice::from_ref(&first)).await.unwrap();

        let fresh = Job::new("k", json!(2));
        let result = backend.insert(&[fresh.clone(), first]).await;

        assert!(matches!(result, Err(QueueError::DuplicateJob { .. })));
        assert!(backend.get(fresh.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_hides_job_until_lease_expires() {
        let backend = MemoryBackend::new();
        backend.insert(&[Job::new("k", json!({}))]).await.unwrap();

        let now = Utc::now();
        let lease = now + chrono::Duration::seconds(30);
        let claimed = backend.claim(&kinds(), now, lease).await.unwrap();
        assert!(claimed.is_some());

        assert!(backend.claim(&kinds(), now, lease).await.unwrap().is_none());
        assert!(backend.claim(&kinds(), lease, lease).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extend_after_takeover_fails() {
        let backend = MemoryBackend::new();
        backend.insert(&[Job::new("k", json!({}))]).await.unwrap();

        let now = Utc::now();
        let first_lease = now + chrono::Duration::seconds(30);
        let job = backend.claim(&kinds(), now, first_lease).await.unwrap().unwrap();

        let second_lease = first_lease + chrono::Duration::seconds(30);
        backend.claim(&kinds(), first_lease, second_lease).await.unwrap().unwrap();

        let result = backend.extend(job.id, first_lease, second_lease).await;
        assert!(matches!(result, Err(QueueError::LeaseLost { .. })));
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_jobs_in_status() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let mut old_done = Job::new("k", json!(1));
        old_done.status = JobStatus::Done;
        old_done.updated_at = now - chrono::Duration::hours(2);
        let mut fresh_done = Job::new("k", json!(2));
        fresh_done.status = JobStatus::Done;
        let mut old_failed = Job::new("k", json!(3));
        old_failed.status = JobStatus::Failed;
        old_failed.updated_at = old_done.updated_at;
        backend
            .insert(&[old_done.clone(), fresh_done.clone(), old_failed.clone()])
            .await
            .unwrap();

        let pruned = backend
            .prune(JobStatus::Done, now - chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(pruned, 1);
        assert!(backend.get(old_done.id).await.unwrap().is_none());
        assert!(backend.get(fresh_done.id).await.unwrap().is_some());
        assert!(backend.get(old_failed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finished_jobs_leave_pending_count() {
        let backend = MemoryBackend::new();
        backend
            .insert(&[Job::new("k", json!(1)), Job::new("k", json!(2))])
            .await
            .unwrap();
        assert_eq!(backend.pending_count().await, 2);

        let now = Utc::now();
        let lease = now + chrono::Duration::seconds(30);
        let mut job = backend.claim(&kinds(), now, lease).await.unwrap().unwrap();
        job.status = JobStatus::Done;
        backend.finish(&job, lease).await.unwrap();

        assert_eq!(backend.pending_count().await, 1);
    }
}
