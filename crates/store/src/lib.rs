//! Persistence for Entropy resources, revisions and modules.
//!
//! Two backends implement the same contracts:
//!
//! - [`MemoryStore`] keeps everything in process memory.
//! - [`SurrealStore`] persists to SurrealDB (`mem://`, `rocksdb://` or a remote server).
//!
//! Writes accept mutation [`Hook`]s. Jobs enqueued by hooks commit in the same
//! write, which is how a pending resource always comes with its sync job.
//! [`ResourceStore::do_pending`] is the reconciliation primitive: it claims one
//! due resource at a time per URN and applies the handler's outcome.

pub mod error;
pub mod hooks;
pub mod memory;
pub mod store;
pub mod surreal;

pub use error::{PersistenceError, PersistenceResult};
pub use hooks::{Hook, SYNC_JOB_KIND, SyncJobPayload, TxBuffer, TxContext, enqueue_sync, run_hooks, sync_job};
pub use memory::MemoryStore;
pub use store::{CREATE_REASON, ModuleStore, PendingHandler, PendingOutcome, ResourceStore};
pub use surreal::{ClaimConfig, Credentials, STORE_SCHEMA, StoreConfig, SurrealStore};
