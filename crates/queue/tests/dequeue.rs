//! Behavioural tests for the lease-holding dequeue loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use entropy_queue::{
    JOB_SCHEMA, Job, JobOutcome, JobQueue, JobStatus, MemoryBackend, QueueBackend, QueueConfig,
    QueueError, SurrealBackend,
};
use serde_json::json;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};

const KIND: &str = "sync_resource";

fn kinds() -> Vec<String> {
    vec![KIND.to_string()]
}

fn memory_queue() -> JobQueue<MemoryBackend> {
    JobQueue::new(Arc::new(MemoryBackend::new()), QueueConfig::default())
}

async fn surreal_queue() -> JobQueue<SurrealBackend> {
    let db: Surreal<Any> = connect("mem://").await.unwrap();
    db.use_ns("entropy").use_db("test").await.unwrap();
    db.query(JOB_SCHEMA).await.unwrap().check().unwrap();
    JobQueue::new(Arc::new(SurrealBackend::new(Arc::new(db))), QueueConfig::default())
}

#[tokio::test]
async fn given_empty_queue_when_dequeue_then_nothing_runs() {
    let queue = memory_queue();
    let ran = AtomicBool::new(false);

    let result = queue
        .dequeue(&kinds(), |_| async {
            ran.store(true, Ordering::SeqCst);
            JobOutcome::Done(json!(null))
        })
        .await
        .unwrap();

    assert!(result.is_none());
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn given_pending_job_when_handler_succeeds_then_job_is_done() {
    // GIVEN
    let queue = memory_queue();
    let job = Job::new(KIND, json!({"resource_urn": "urn:goto:entropy:mock:p1:r1"}));
    queue.enqueue(std::slice::from_ref(&job)).await.unwrap();

    // WHEN
    let finished = queue
        .dequeue(&kinds(), |job| async move { JobOutcome::Done(job.payload) })
        .await
        .unwrap()
        .unwrap();

    // THEN
    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(finished.attempts_done, 1);
    assert_eq!(finished.result, Some(job.payload.clone()));
    assert_eq!(queue.get(job.id).await.unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn given_retryable_failure_when_dequeue_then_job_rescheduled() {
    let queue = memory_queue();
    let job = Job::new(KIND, json!({}));
    queue.enqueue(std::slice::from_ref(&job)).await.unwrap();

    let before = Utc::now();
    let finished = queue
        .dequeue(&kinds(), |_| async {
            JobOutcome::retry(Duration::from_secs(5), "helm busy")
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobStatus::Pending);
    assert_eq!(finished.last_error.as_deref(), Some("helm busy"));
    assert!(finished.run_at >= before + chrono::Duration::seconds(5));

    let again = queue
        .dequeue(&kinds(), |_| async { JobOutcome::Done(json!(null)) })
        .await
        .unwrap();
    assert!(again.is_none(), "retried job must wait for run_at");
}

#[tokio::test]
async fn given_permanent_failure_when_dequeue_then_job_failed() {
    let queue = memory_queue();
    queue.enqueue(&[Job::new(KIND, json!({}))]).await.unwrap();

    let finished = queue
        .dequeue(&kinds(), |_| async { JobOutcome::failed("bad payload") })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.last_error.as_deref(), Some("bad payload"));
}

async fn explode() -> JobOutcome {
    panic!("driver exploded")
}

#[tokio::test]
async fn given_panicking_handler_when_dequeue_then_job_marked_panic() {
    let queue = memory_queue();
    queue.enqueue(&[Job::new(KIND, json!({}))]).await.unwrap();

    let finished = queue
        .dequeue(&kinds(), |_| explode())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobStatus::Panic);
    assert!(finished.last_error.unwrap().contains("driver exploded"));
}

#[tokio::test]
async fn given_other_kind_when_dequeue_then_job_untouched() {
    let queue = memory_queue();
    let job = Job::new("cleanup", json!({}));
    queue.enqueue(std::slice::from_ref(&job)).await.unwrap();

    let result = queue
        .dequeue(&kinds(), |_| async { JobOutcome::Done(json!(null)) })
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(queue.get(job.id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn given_slow_handler_when_heartbeat_ticks_then_lease_is_extended() {
    let queue = JobQueue::new(
        Arc::new(MemoryBackend::new()),
        QueueConfig {
            refresh_interval: Duration::from_secs(1),
            extend_interval: Duration::from_secs(30),
        },
    );
    queue.enqueue(&[Job::new(KIND, json!({}))]).await.unwrap();

    let finished = queue
        .dequeue(&kinds(), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            JobOutcome::Done(json!("slow"))
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, JobStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn given_stolen_lease_when_heartbeat_fails_then_handler_is_cancelled() {
    // GIVEN a job whose lease is taken over while the handler is running
    let backend = Arc::new(MemoryBackend::new());
    let queue = JobQueue::new(
        Arc::clone(&backend),
        QueueConfig {
            refresh_interval: Duration::from_secs(1),
            extend_interval: Duration::from_secs(30),
        },
    );
    let job = Job::new(KIND, json!({}));
    queue.enqueue(std::slice::from_ref(&job)).await.unwrap();

    let completed = Arc::new(AtomicBool::new(false));
    let thief = Arc::clone(&backend);
    let flag = Arc::clone(&completed);

    // WHEN
    let result = queue
        .dequeue(&kinds(), move |_| async move {
            let far = Utc::now() + chrono::Duration::hours(1);
            thief
                .claim(&[KIND.to_string()], far, far + chrono::Duration::seconds(30))
                .await
                .unwrap()
                .expect("job is claimable after its lease");
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
            JobOutcome::Done(json!(null))
        })
        .await;

    // THEN
    assert!(matches!(result, Err(QueueError::LeaseLost { .. })));
    assert!(!completed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn given_surreal_backend_when_job_round_trips_then_outcome_persisted() {
    let queue = surreal_queue().await;
    let job = Job::new(KIND, json!({"resource_urn": "urn:goto:entropy:mock:p1:r1"}));
    queue.enqueue(std::slice::from_ref(&job)).await.unwrap();

    let claimed_again = Arc::new(AtomicBool::new(false));
    let finished = queue
        .dequeue(&kinds(), |job| async move { JobOutcome::Done(job.payload) })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Done);

    let second = queue
        .dequeue(&kinds(), |_| async {
            claimed_again.store(true, Ordering::SeqCst);
            JobOutcome::Done(json!(null))
        })
        .await
        .unwrap();
    assert!(second.is_none());
    assert!(!claimed_again.load(Ordering::SeqCst));

    let stored = queue.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Done);
    assert_eq!(stored.result, Some(job.payload));
    assert_eq!(queue.backend().list(KIND).await.unwrap().len(), 1);
}

#[tokio::test]
async fn given_done_job_past_retention_when_pruning_then_only_it_is_removed() {
    // GIVEN
    let queue = surreal_queue().await;
    let done = Job::new(KIND, json!({"resource_urn": "urn:goto:entropy:mock:p1:done"}));
    queue.enqueue(std::slice::from_ref(&done)).await.unwrap();
    queue
        .dequeue(&kinds(), |job| async move { JobOutcome::Done(job.payload) })
        .await
        .unwrap()
        .unwrap();
    let waiting = Job::new(KIND, json!({"resource_urn": "urn:goto:entropy:mock:p1:waiting"}));
    queue.enqueue(std::slice::from_ref(&waiting)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // WHEN
    let pruned = queue.prune_done(Duration::ZERO).await.unwrap();

    // THEN
    assert_eq!(pruned, 1);
    assert!(queue.backend().get(done.id).await.unwrap().is_none());
    assert_eq!(queue.get(waiting.id).await.unwrap().status, JobStatus::Pending);
}
