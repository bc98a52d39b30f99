//! Entropy Reconciler
//!
//! The sync worker: consumes sync jobs, claims due resources and drives them
//! through their drivers one step at a time until they reach a terminal
//! state. Failures are recorded on the resource and rescheduled with backoff.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod error;
pub mod syncer;
pub mod worker;

pub use backoff::Backoff;
pub use error::{Error, Result};
pub use syncer::{SyncPass, Syncer};
pub use worker::{MAX_JOB_RETENTION, MIN_POLL_INTERVAL, SyncConfig, SyncWorker};
