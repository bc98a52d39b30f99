//! Entropy Module
//!
//! The driver contract every kind implements, kind descriptors, the
//! process-wide registry resolving modules to drivers, and helpers shared by
//! driver implementations.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod descriptor;
pub mod driver;
pub mod framework;
pub mod registry;

pub use descriptor::{ActionDesc, Descriptor, DriverFactory};
pub use driver::{
    ActionRequest, CREATE_ACTION, DELETE_ACTION, Driver, ExpandedResource, LogChunk, LogFilter,
    LogStream, Loggable, ResolvedDependency, UPDATE_ACTION,
};
pub use framework::{
    MAX_RELEASE_NAME_LEN, PENDING_STEPS_KEY, completed_state, decode_configs, decode_transient,
    encode_transient, guarded, merge_configs, pending_state, safe_name,
};
pub use registry::{RegisteredKind, Registry};
