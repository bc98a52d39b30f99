//! Job model and handler outcomes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Lifecycle of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Done,
    Failed,
    Panic,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Panic => "PANIC",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            "PANIC" => Some(Self::Panic),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Ulid,
    pub kind: String,
    pub status: JobStatus,
    /// Earliest execution time; while claimed it holds the lease expiry.
    pub run_at: DateTime<Utc>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts_done: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
}

impl Job {
    /// Create a pending job that is eligible immediately.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new(),
            kind: kind.into(),
            status: JobStatus::Pending,
            run_at: now,
            payload,
            created_at: now,
            updated_at: now,
            attempts_done: 0,
            last_attempt_at: None,
            last_error: None,
            result: None,
        }
    }

    #[must_use]
    pub const fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    /// Claimable by a worker asking for `kinds` at `now`.
    #[must_use]
    pub fn is_eligible(&self, kinds: &[String], now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.run_at <= now
            && kinds.iter().any(|k| *k == self.kind)
    }

    /// Record the outcome of one attempt that started at `attempted_at`.
    pub fn apply(&mut self, outcome: JobOutcome, attempted_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.attempts_done = self.attempts_done.saturating_add(1);
        self.last_attempt_at = Some(attempted_at);
        self.updated_at = now;

        match outcome {
            JobOutcome::Done(result) => {
                self.status = JobStatus::Done;
                self.result = Some(result);
                self.last_error = None;
            }
            JobOutcome::Retry { after, error } => {
                self.status = JobStatus::Pending;
                self.run_at = now
                    + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
                self.last_error = Some(error);
            }
            JobOutcome::Failed(error) => {
                self.status = JobStatus::Failed;
                self.last_error = Some(error);
            }
            JobOutcome::Panicked(message) => {
                self.status = JobStatus::Panic;
                self.last_error = Some(format!("panic: {message}"));
            }
        }
    }
}

/// Result of running a job handler.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Success; the value is stored as the job result.
    Done(Value),
    /// Transient failure; run again after `after`.
    Retry { after: Duration, error: String },
    /// Permanent failure.
    Failed(String),
    /// The handler panicked.
    Panicked(String),
}

impl JobOutcome {
    pub fn retry(after: Duration, error: impl fmt::Display) -> Self {
        Self::Retry {
            after,
            error: error.to_string(),
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds() -> Vec<String> {
        vec!["sync_resource".to_string()]
    }

    #[test]
    fn test_new_job_is_immediately_eligible() {
        let job = Job::new("sync_resource", json!({}));
        assert!(job.is_eligible(&kinds(), Utc::now()));
        assert!(!job.is_eligible(&["other".to_string()], Utc::now()));
    }

    #[test]
    fn test_future_job_not_eligible() {
        let now = Utc::now();
        let job = Job::new("sync_resource", json!({})).with_run_at(now + chrono::Duration::seconds(10));
        assert!(!job.is_eligible(&kinds(), now));
    }

    #[test]
    fn test_apply_retry_reschedules() {
        let now = Utc::now();
        let mut job = Job::new("sync_resource", json!({}));
        job.apply(JobOutcome::retry(Duration::from_secs(5), "busy"), now, now);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts_done, 1);
        assert_eq!(job.run_at, now + chrono::Duration::seconds(5));
        assert_eq!(job.last_error.as_deref(), Some("busy"));
    }

    #[test]
    fn test_apply_panic() {
        let now = Utc::now();
        let mut job = Job::new("sync_resource", json!({}));
        job.apply(JobOutcome::Panicked("boom".to_string()), now, now);
        assert_eq!(job.status, JobStatus::Panic);
        assert_eq!(job.last_error.as_deref(), Some("panic: boom"));
    }

    #[test]
    fn test_status_parse() {
        for status in [JobStatus::Pending, JobStatus::Done, JobStatus::Failed, JobStatus::Panic] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("RUNNING"), None);
    }
}
