#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use entropy_core::{Clock, Status, SystemClock};
use entropy_queue::{Job, JobStatus};
use entropy_reconciler::{SyncConfig, SyncWorker};
use entropy_store::{SYNC_JOB_KIND, sync_job};
use serde_json::json;
use tokio::sync::watch;

use common::{Harness, ScriptedDriver, state};

const WAIT_LIMIT: Duration = Duration::from_secs(10);

fn config(workers: usize) -> SyncConfig {
    SyncConfig::new()
        .with_worker_count(workers)
        .with_poll_interval(Duration::from_millis(100))
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_duplicate_jobs_and_many_workers_when_running_then_syncs_never_overlap_and_converge() {
    let driver = ScriptedDriver::slow(Duration::from_millis(30), |call, _| {
        Ok(state(if call < 4 { Status::Pending } else { Status::Completed }))
    });
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let h = Harness::new(Arc::clone(&driver), Arc::clone(&clock)).await;
    let res = h.seed("orders", Status::Pending).await;

    let duplicates: Vec<Job> = (0..3)
        .map(|_| sync_job(&res.urn, clock.now()).unwrap())
        .collect();
    h.queue.insert(&duplicates).await.unwrap();

    let worker = Arc::new(SyncWorker::new(h.syncer(), h.queue.clone(), config(4)).unwrap());
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run_sync(shutdown).await }
    });

    let (harness, urn) = (&h, res.urn.as_str());
    wait_until(move || async move { harness.get(urn).await.state.status == Status::Completed }).await;
    stop.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(driver.calls(), 5);
    assert_eq!(driver.max_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_idle_workers_when_shutdown_is_signalled_then_run_sync_returns() {
    let driver = ScriptedDriver::new(|_, _| Ok(state(Status::Completed)));
    let h = Harness::new(driver, Arc::new(SystemClock)).await;

    let worker = SyncWorker::new(h.syncer(), h.queue.clone(), config(2)).unwrap();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run_sync(shutdown).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    stop.send(true).unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(2), running).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_malformed_payload_when_processing_then_job_fails_without_retry() {
    let driver = ScriptedDriver::new(|_, _| Ok(state(Status::Completed)));
    let h = Harness::new(Arc::clone(&driver), Arc::new(SystemClock)).await;
    let bad = Job::new(SYNC_JOB_KIND, json!({"urn": 42}));
    let id = bad.id;
    h.queue.insert(&[bad]).await.unwrap();

    let worker = SyncWorker::new(h.syncer(), h.queue.clone(), config(1)).unwrap();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run_sync(shutdown).await });

    let queue = &h.queue;
    wait_until(move || async move {
        queue
            .get(id)
            .await
            .unwrap()
            .is_some_and(|job| job.status == JobStatus::Failed)
    })
    .await;
    stop.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(driver.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_surreal_store_when_workers_run_then_pending_resource_completes() {
    let driver = ScriptedDriver::new(|call, _| {
        Ok(state(if call < 2 { Status::Pending } else { Status::Completed }))
    });
    let (h, _store) = Harness::surreal(Arc::clone(&driver), Arc::new(SystemClock)).await;
    let res = h.seed("orders", Status::Pending).await;

    let worker = SyncWorker::new(h.syncer(), h.queue.clone(), config(2)).unwrap();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run_sync(shutdown).await });

    let (harness, urn) = (&h, res.urn.as_str());
    wait_until(move || async move {
        harness.get(urn).await.state.status == Status::Completed
            && harness
                .sync_jobs()
                .await
                .iter()
                .all(|job| job.status == JobStatus::Done)
    })
    .await;
    stop.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(driver.calls(), 3);
    assert_eq!(driver.max_in_flight(), 1);
    assert!(!h.store.is_claimed(&res.urn).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_claim_left_by_crashed_worker_when_job_runs_then_it_retries_until_the_claim_expires() {
    // GIVEN a pending resource whose row is still claimed by a worker that died
    let driver = ScriptedDriver::new(|_, _| Ok(state(Status::Completed)));
    let (h, store) = Harness::surreal(Arc::clone(&driver), Arc::new(SystemClock)).await;
    let res = h.seed("orders", Status::Pending).await;
    let held_until = Utc::now() + chrono::Duration::milliseconds(1_500);
    store
        .db()
        .query(
            "UPDATE type::thing('resource', $urn) \
             SET claimed_until_ms = $until, claim_token = 'crashed-worker'",
        )
        .bind(("urn", res.urn.clone()))
        .bind(("until", held_until.timestamp_millis()))
        .await
        .unwrap()
        .check()
        .unwrap();
    assert!(h.store.is_claimed(&res.urn).await.unwrap());

    // WHEN
    let worker = SyncWorker::new(h.syncer(), h.queue.clone(), config(1)).unwrap();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run_sync(shutdown).await });

    // THEN the sync job is retried rather than acked, and the resource converges
    let (harness, urn) = (&h, res.urn.as_str());
    wait_until(move || async move { harness.get(urn).await.state.status == Status::Completed }).await;
    stop.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(driver.calls(), 1);
    let jobs = h.sync_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Done);
    assert!(jobs[0].attempts_done >= 2, "attempts: {}", jobs[0].attempts_done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_short_retention_when_workers_run_then_done_jobs_are_pruned() {
    let driver = ScriptedDriver::new(|_, _| Ok(state(Status::Completed)));
    let h = Harness::new(Arc::clone(&driver), Arc::new(SystemClock)).await;
    h.seed("orders", Status::Pending).await;

    let worker = SyncWorker::new(
        h.syncer(),
        h.queue.clone(),
        config(1).with_job_retention(Duration::from_millis(200)),
    )
    .unwrap();
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run_sync(shutdown).await });

    let (harness, driver) = (&h, &driver);
    wait_until(move || async move { driver.calls() == 1 && harness.sync_jobs().await.is_empty() }).await;
    stop.send(true).unwrap();
    running.await.unwrap().unwrap();
}

#[test]
fn given_poll_interval_below_floor_when_building_worker_then_rejected() {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let h = rt.block_on(Harness::new(
        ScriptedDriver::new(|_, _| Ok(state(Status::Completed))),
        Arc::new(SystemClock),
    ));
    let config = SyncConfig::new().with_poll_interval(Duration::from_millis(5));

    assert!(SyncWorker::new(h.syncer(), h.queue.clone(), config).is_err());
}
