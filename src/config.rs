//! Process configuration loaded from a TOML file.
//!
//! Every section has defaults, so an empty (or absent) file yields a
//! runnable in-memory setup.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use entropy_drivers::CliClients;
use entropy_queue::QueueConfig;
use entropy_reconciler::{Backoff, SyncConfig};
use entropy_store::{ClaimConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub drivers: CliClients,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Seconds in-flight work may take to finish after a shutdown signal.
    pub grace_period_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            grace_period_secs: 5,
        }
    }
}

impl ServiceConfig {
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad listen address: {e}")))
    }

    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub poll_interval_ms: u64,
    /// Heartbeat period for job leases and resource claims.
    pub refresh_interval_secs: u64,
    /// Lifetime granted by each heartbeat.
    pub extend_interval_secs: u64,
    pub backoff_start_secs: u64,
    pub backoff_ceiling_secs: u64,
    /// How long DONE jobs are kept; 0 keeps them forever.
    pub job_retention_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            count: sync.worker_count,
            poll_interval_ms: 1_000,
            refresh_interval_secs: sync.queue.refresh_interval.as_secs(),
            extend_interval_secs: sync.queue.extend_interval.as_secs(),
            backoff_start_secs: sync.backoff.start.as_secs(),
            backoff_ceiling_secs: sync.backoff.ceiling.as_secs(),
            job_retention_secs: sync.job_retention.as_secs(),
        }
    }
}

impl WorkerConfig {
    pub const fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            worker_count: self.count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            backoff: Backoff::new(
                Duration::from_secs(self.backoff_start_secs),
                Duration::from_secs(self.backoff_ceiling_secs),
            ),
            queue: QueueConfig {
                refresh_interval: Duration::from_secs(self.refresh_interval_secs),
                extend_interval: Duration::from_secs(self.extend_interval_secs),
            },
            job_retention: Duration::from_secs(self.job_retention_secs),
        }
    }

    /// Resource claims use the job lease timing.
    pub const fn claim_config(&self) -> ClaimConfig {
        ClaimConfig {
            ttl: Duration::from_secs(self.extend_interval_secs),
            refresh: Duration::from_secs(self.refresh_interval_secs),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.addr()?;
        self.worker
            .sync_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_empty_file_is_valid() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = Config::parse(
            r#"
            [service]
            port = 9090

            [worker]
            count = 4

            [store]
            url = "rocksdb://data/entropy"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.port, 9090);
        assert_eq!(config.service.host, "0.0.0.0");
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.poll_interval_ms, 1_000);
        assert_eq!(config.store.url, "rocksdb://data/entropy");
        assert_eq!(config.store.namespace, "entropy");
    }

    #[test]
    fn test_worker_section_maps_to_sync_config() {
        let worker = WorkerConfig {
            count: 3,
            poll_interval_ms: 250,
            backoff_start_secs: 2,
            backoff_ceiling_secs: 60,
            ..WorkerConfig::default()
        };
        let sync = worker.sync_config();
        assert_eq!(sync.worker_count, 3);
        assert_eq!(sync.poll_interval, Duration::from_millis(250));
        assert_eq!(sync.backoff.delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_claim_timing_follows_lease_timing() {
        let worker = WorkerConfig {
            refresh_interval_secs: 4,
            extend_interval_secs: 12,
            ..WorkerConfig::default()
        };
        let claim = worker.claim_config();
        assert_eq!(claim.ttl, Duration::from_secs(12));
        assert_eq!(claim.refresh, Duration::from_secs(4));
        assert_eq!(worker.sync_config().queue.extend_interval, claim.ttl);
    }

    #[test]
    fn test_lease_intervals_are_validated() {
        let zero = Config::parse("[worker]\nrefresh_interval_secs = 0").unwrap();
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let inverted =
            Config::parse("[worker]\nrefresh_interval_secs = 60\nextend_interval_secs = 5").unwrap();
        assert!(matches!(inverted.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_poll_interval_floor_is_enforced() {
        let config = Config::parse("[worker]\npoll_interval_ms = 10").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let rendered = Config::default().to_toml().unwrap();
        assert_eq!(Config::parse(&rendered).unwrap(), Config::default());
    }
}
