//! Entropy Drivers
//!
//! Built-in kinds and the infrastructure clients they drive:
//!
//! - `kubernetes`: a cluster connection other kinds depend on
//! - `firehose`: a helm release consuming from Kafka, with scale, start,
//!   stop, offset reset and chart upgrade actions

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clients;
pub mod error;
pub mod firehose;
pub mod kubernetes;

use std::sync::Arc;

use entropy_core::{Clock, Result};
use entropy_module::Registry;

pub use clients::{
    ChartRef, CliClients, ClusterClients, ClusterConnection, HelmClient, JobSpec, KubeClient,
    LineStream, PodInfo, ReleaseInfo, ReleaseSpec,
};
pub use error::{DEFAULT_RETRY_AFTER, InfraError, InfraResult};

/// Register every built-in kind.
pub fn register_builtin(
    registry: &Registry,
    clients: Arc<dyn ClusterClients>,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    registry.register(kubernetes::descriptor(Arc::clone(&clients)))?;
    registry.register(firehose::descriptor(clients, clock))?;
    Ok(())
}
