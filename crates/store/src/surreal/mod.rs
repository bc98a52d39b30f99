//! SurrealDB-backed store.
//!
//! Provides connection management, schema migration and the resource and
//! module stores on top of one shared connection.

mod modules;
mod records;
mod resources;

use std::sync::Arc;
use std::time::Duration;

use entropy_core::{Clock, SystemClock};
use entropy_queue::{JOB_SCHEMA, SurrealBackend};
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

use crate::error::{PersistenceError, PersistenceResult, from_surrealdb_error};

pub use records::{ModuleRecord, ResourceRecord, RevisionRecord};

/// Schema for resources, revisions and modules.
pub const STORE_SCHEMA: &str = include_str!("schema.surql");

/// Configuration for the SurrealDB connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL (e.g., "mem://", "rocksdb://data/entropy", "ws://localhost:8000")
    pub url: String,
    /// Namespace to use
    pub namespace: String,
    /// Database to use
    pub database: String,
    /// Optional root credentials
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl StoreConfig {
    /// Create an in-memory configuration for testing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "entropy".to_string(),
            database: "test".to_string(),
            credentials: None,
        }
    }

    /// Create a configuration for an embedded RocksDB database at `path`.
    #[must_use]
    pub fn rocksdb(path: &str) -> Self {
        Self {
            url: format!("rocksdb://{path}"),
            namespace: "entropy".to_string(),
            database: "entropy".to_string(),
            credentials: None,
        }
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Timing of pending-resource claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimConfig {
    /// How long a claim stays valid without refresh.
    pub ttl: Duration,
    /// Refresh period while a handler runs.
    pub refresh: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            refresh: Duration::from_secs(10),
        }
    }
}

/// Resource and module store over SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    db: Arc<Surreal<Any>>,
    config: StoreConfig,
    claim: ClaimConfig,
    clock: Arc<dyn Clock>,
}

impl SurrealStore {
    /// Connect to the database with the given configuration.
    pub async fn connect(config: StoreConfig) -> PersistenceResult<Self> {
        let db = Surreal::<Any>::init();

        db.connect(&config.url)
            .await
            .map_err(|e| PersistenceError::connection_failed(e.to_string()))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(from_surrealdb_error)?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(from_surrealdb_error)?;

        tracing::info!(url = %config.url, namespace = %config.namespace, database = %config.database, "Connected to store");

        Ok(Self {
            db: Arc::new(db),
            config,
            claim: ClaimConfig::default(),
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_claim_config(mut self, claim: ClaimConfig) -> Self {
        self.claim = claim;
        self
    }

    #[must_use]
    pub fn db(&self) -> &Arc<Surreal<Any>> {
        &self.db
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Queue backend sharing this connection, so hook jobs and queue reads
    /// see the same data.
    #[must_use]
    pub fn queue_backend(&self) -> SurrealBackend {
        SurrealBackend::new(Arc::clone(&self.db))
    }

    /// Apply the store and job schemas. Idempotent.
    pub async fn initialize_schema(&self) -> PersistenceResult<()> {
        for schema in [STORE_SCHEMA, JOB_SCHEMA] {
            self.db
                .query(schema)
                .await
                .map_err(|e| PersistenceError::schema_error(e.to_string()))?
                .check()
                .map_err(|e| PersistenceError::schema_error(e.to_string()))?;
        }
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> PersistenceResult<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(from_surrealdb_error)?;
        Ok(())
    }
}

/// Turn statement errors of a multi-statement response into one error.
pub(crate) fn check(mut response: surrealdb::Response) -> PersistenceResult<surrealdb::Response> {
    let mut errors: Vec<(usize, surrealdb::Error)> = response.take_errors().into_iter().collect();
    if errors.is_empty() {
        return Ok(response);
    }
    errors.sort_by_key(|(idx, _)| *idx);
    let joined = errors
        .iter()
        .map(|(_, err)| err.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(from_surrealdb_error(joined))
}
