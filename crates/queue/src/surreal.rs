//! SurrealDB queue backend.
//!
//! Timestamps are stored as epoch milliseconds so lease comparisons are plain
//! integer comparisons.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::{RecordId, Surreal};
use ulid::Ulid;

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult, from_surrealdb_error};
use crate::job::{Job, JobStatus};

/// Schema for the `job` table.
pub const JOB_SCHEMA: &str = include_str!("schema.surql");

const CLAIM_BATCH: i64 = 8;

/// Row shape of a job in SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default, skip_serializing)]
    pub id: Option<RecordId>,
    pub job_id: String,
    pub kind: String,
    pub status: String,
    pub run_at_ms: i64,
    pub payload: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub attempts_done: u32,
    pub last_attempt_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub result: Option<String>,
}

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::serialization(format!("timestamp out of range: {ms}")))
}

impl TryFrom<&Job> for JobRecord {
    type Error = QueueError;

    fn try_from(job: &Job) -> QueueResult<Self> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| QueueError::serialization(e.to_string()))?;
        let result = job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| QueueError::serialization(e.to_string()))?;

        Ok(Self {
            id: None,
            job_id: job.id.to_string(),
            kind: job.kind.clone(),
            status: job.status.to_string(),
            run_at_ms: to_ms(job.run_at),
            payload,
            created_at_ms: to_ms(job.created_at),
            updated_at_ms: to_ms(job.updated_at),
            attempts_done: job.attempts_done,
            last_attempt_at_ms: job.last_attempt_at.map(to_ms),
            last_error: job.last_error.clone(),
            result,
        })
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = QueueError;

    fn try_from(record: JobRecord) -> QueueResult<Self> {
        let id = Ulid::from_string(&record.job_id)
            .map_err(|e| QueueError::serialization(format!("bad job id: {e}")))?;
        let status = JobStatus::parse(&record.status)
            .ok_or_else(|| QueueError::serialization(format!("bad job status: {}", record.status)))?;
        let payload = serde_json::from_str(&record.payload)
            .map_err(|e| QueueError::serialization(e.to_string()))?;
        let result = record
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| QueueError::serialization(e.to_string()))?;

        Ok(Self {
            id,
            kind: record.kind,
            status,
            run_at: from_ms(record.run_at_ms)?,
            payload,
            created_at: from_ms(record.created_at_ms)?,
            updated_at: from_ms(record.updated_at_ms)?,
            attempts_done: record.attempts_done,
            last_attempt_at: record.last_attempt_at_ms.map(from_ms).transpose()?,
            last_error: record.last_error,
            result,
        })
    }
}

/// Render `CREATE` statements for `jobs`, binding each record under
/// `<prefix><index>`. Callers splice the statements into their own
/// transaction so jobs commit together with other writes.
pub fn insert_statements(jobs: &[Job], prefix: &str) -> QueueResult<(String, Vec<(String, JobRecord)>)> {
    let mut sql = String::new();
    let mut bindings = Vec::with_capacity(jobs.len());
    for (idx, job) in jobs.iter().enumerate() {
        let param = format!("{prefix}{idx}");
        sql.push_str(&format!(
            "CREATE type::thing('job', ${param}.job_id) CONTENT ${param};\n"
        ));
        bindings.push((param, JobRecord::try_from(job)?));
    }
    Ok((sql, bindings))
}

/// Concurrent writers on the same row surface as a retryable conflict.
fn is_write_conflict(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("conflict") || msg.contains("can be retried")
}

/// Queue backend over a shared SurrealDB connection.
#[derive(Debug, Clone)]
pub struct SurrealBackend {
    db: Arc<Surreal<Any>>,
}

impl SurrealBackend {
    #[must_use]
    pub const fn new(db: Arc<Surreal<Any>>) -> Self {
        Self { db }
    }

    async fn cas_run_at(
        &self,
        job_id: String,
        held_ms: i64,
        sets: &str,
        bind: impl FnOnce(surrealdb::method::Query<'_, Any>) -> surrealdb::method::Query<'_, Any>,
    ) -> QueueResult<Option<JobRecord>> {
        let sql = format!(
            "UPDATE type::thing('job', $job_id) SET {sets} \
             WHERE status = 'PENDING' AND run_at_ms = $held RETURN AFTER"
        );
        let query = self
            .db
            .query(sql)
            .bind(("job_id", job_id))
            .bind(("held", held_ms));
        let mut response = match bind(query).await.and_then(surrealdb::Response::check) {
            Ok(response) => response,
            Err(err) if is_write_conflict(&err) => {
                tracing::debug!(error = %err, "Lost lease race");
                return Ok(None);
            }
            Err(err) => return Err(from_surrealdb_error(err)),
        };
        let updated: Vec<JobRecord> = response.take(0).map_err(from_surrealdb_error)?;
        Ok(updated.into_iter().next())
    }
}

#[async_trait]
impl QueueBackend for SurrealBackend {
    async fn insert(&self, jobs: &[Job]) -> QueueResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let (statements, bindings) = insert_statements(jobs, "job_")?;
        let sql = format!("BEGIN TRANSACTION;\n{statements}COMMIT TRANSACTION;");

        let mut query = self.db.query(sql);
        for binding in bindings {
            query = query.bind(binding);
        }
        query
            .await
            .map_err(from_surrealdb_error)?
            .check()
            .map_err(from_surrealdb_error)?;
        Ok(())
    }

    async fn claim(
        &self,
        kinds: &[String],
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let now_ms = to_ms(now);
        let candidates: Vec<JobRecord> = self
            .db
            .query(
                "SELECT * FROM job WHERE status = 'PENDING' AND kind INSIDE $kinds \
                 AND run_at_ms <= $now ORDER BY run_at_ms LIMIT $limit",
            )
            .bind(("kinds", kinds.to_vec()))
            .bind(("now", now_ms))
            .bind(("limit", CLAIM_BATCH))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        let lease_ms = to_ms(lease_until);
        for candidate in candidates {
            let claimed = self
                .cas_run_at(
                    candidate.job_id.clone(),
                    candidate.run_at_ms,
                    "run_at_ms = $lease, updated_at_ms = $now",
                    |q| q.bind(("lease", lease_ms)).bind(("now", now_ms)),
                )
                .await?;
            if let Some(record) = claimed {
                return Job::try_from(record).map(Some);
            }
            tracing::debug!(job_id = %candidate.job_id, "Job claimed by another worker");
        }
        Ok(None)
    }

    async fn extend(
        &self,
        id: Ulid,
        held_until: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        let until_ms = to_ms(until);
        let extended = self
            .cas_run_at(
                id.to_string(),
                to_ms(held_until),
                "run_at_ms = $until",
                |q| q.bind(("until", until_ms)),
            )
            .await?;
        match extended {
            Some(_) => from_ms(until_ms),
            None => Err(QueueError::lease_lost(id)),
        }
    }

    async fn finish(&self, job: &Job, held_until: DateTime<Utc>) -> QueueResult<()> {
        let record = JobRecord::try_from(job)?;
        let finished = self
            .cas_run_at(
                record.job_id.clone(),
                to_ms(held_until),
                "status = $status, run_at_ms = $run_at, updated_at_ms = $updated_at, \
                 attempts_done = $attempts, last_attempt_at_ms = $last_attempt_at, \
                 last_error = $last_error, result = $result",
                |q| {
                    q.bind(("status", record.status))
                        .bind(("run_at", record.run_at_ms))
                        .bind(("updated_at", record.updated_at_ms))
                        .bind(("attempts", record.attempts_done))
                        .bind(("last_attempt_at", record.last_attempt_at_ms))
                        .bind(("last_error", record.last_error))
                        .bind(("result", record.result))
                },
            )
            .await?;
        finished.map(|_| ()).ok_or_else(|| QueueError::lease_lost(job.id))
    }

    async fn get(&self, id: Ulid) -> QueueResult<Option<Job>> {
        let record: Option<JobRecord> = self
            .db
            .select(("job", id.to_string()))
            .await
            .map_err(from_surrealdb_error)?;
        record.map(Job::try_from).transpose()
    }

    async fn list(&self, kind: &str) -> QueueResult<Vec<Job>> {
        let records: Vec<JobRecord> = self
            .db
            .query("SELECT * FROM job WHERE kind = $kind ORDER BY created_at_ms, job_id")
            .bind(("kind", kind.to_string()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        records.into_iter().map(Job::try_from).collect()
    }

    async fn prune(&self, status: JobStatus, before: DateTime<Utc>) -> QueueResult<usize> {
        let removed: Vec<JobRecord> = self
            .db
            .query("DELETE job WHERE status = $status AND updated_at_ms < $before RETURN BEFORE")
            .bind(("status", status.to_string()))
            .bind(("before", to_ms(before)))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;
        Ok(removed.len())
    }
}
