//! Entropy Service
//!
//! [`ResourceService`] turns user intents (create, update, delete, actions)
//! into driver plans and persists them with their sync jobs.
//! [`ModuleService`] manages the per-project driver configuration.
//! [`Resolver`] is shared with the sync worker.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod modules;
pub mod resolver;
pub mod resources;

pub use modules::ModuleService;
pub use resolver::{ResolvedDriver, Resolver};
pub use resources::{ResourceService, action_reason};
