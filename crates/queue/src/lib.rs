//! Durable job queue for Entropy background work.
//!
//! Jobs are claimed one at a time. While a handler runs, a heartbeat keeps
//! pushing the job's `run_at` forward so no other worker can claim it; if the
//! worker dies the lease simply expires and the job becomes eligible again.
//!
//! ```ignore
//! let queue = JobQueue::new(Arc::new(MemoryBackend::new()), QueueConfig::default());
//! queue.enqueue(&[Job::new("sync_resource", json!({"resource_urn": urn}))]).await?;
//! queue.dequeue(&["sync_resource".into()], |job| async move {
//!     JobOutcome::Done(job.payload)
//! }).await?;
//! ```

pub mod backend;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod surreal;

pub use backend::QueueBackend;
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobOutcome, JobStatus};
pub use memory::MemoryBackend;
pub use queue::{JobQueue, QueueConfig};
pub use surreal::{JOB_SCHEMA, JobRecord, SurrealBackend, insert_statements};
