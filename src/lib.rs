//! Entropy
//!
//! Process-level pieces of the control plane binary: configuration, tracing
//! setup, service wiring, the HTTP API and shutdown handling.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod shutdown;

pub use app::App;
pub use config::{Config, ConfigError};
