//! # Entropy
//!
//! Startup order:
//!
//! 1. Load and validate configuration
//! 2. Initialise tracing
//! 3. Connect to the store and apply the schema
//! 4. Register built-in kinds and wire the services
//! 5. Start sync workers and, for `serve`, the HTTP API
//!
//! SIGTERM/SIGINT stop intake; in-flight work gets the configured grace
//! period to finish.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use entropy::cli::{Cli, Commands};
use entropy::config::Config;
use entropy::logging::init_tracing;
use entropy::server::run_server;
use entropy::shutdown::{Shutdown, wait_for_signal};
use entropy::App;
use entropy_core::SystemClock;
use entropy_store::SurrealStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Configuration rejected")?;

    if cli.command == Commands::Config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.log);
    info!(command = ?cli.command, "Entropy starting");

    match cli.command {
        Commands::Migrate => migrate(&config).await,
        Commands::Worker => run(&config, false).await,
        Commands::Serve | Commands::Config => run(&config, true).await,
    }
}

async fn connect_store(config: &Config) -> Result<SurrealStore> {
    let store = SurrealStore::connect(config.store.clone())
        .await
        .context("Failed to connect to the store. Please check the [store] section")?
        .with_claim_config(config.worker.claim_config());
    store.health_check().await.context("Store health check failed")?;
    store
        .initialize_schema()
        .await
        .context("Failed to apply the store schema")?;
    Ok(store)
}

async fn migrate(config: &Config) -> Result<()> {
    connect_store(config).await?;
    info!(url = %config.store.url, "Schema applied");
    Ok(())
}

async fn run(config: &Config, with_api: bool) -> Result<()> {
    let store = Arc::new(connect_store(config).await?);
    let app = App::assemble(
        store.clone(),
        store.clone(),
        Arc::new(store.queue_backend()),
        Arc::new(config.drivers.clone()),
        Arc::new(SystemClock),
        config.worker.sync_config(),
    )
    .context("Failed to wire services")?;

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    let worker = app.worker;
    let worker_shutdown = shutdown.subscribe();
    let worker_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        worker
            .run_sync(worker_shutdown)
            .await
            .context("Sync worker failed")
    });

    let mut tasks = vec![("sync worker", worker_task)];
    if with_api {
        let addr = config.service.addr()?;
        let server_shutdown = {
            let shutdown = shutdown.clone();
            async move { shutdown.triggered().await }
        };
        let state = app.state;
        tasks.push((
            "API server",
            tokio::spawn(async move {
                run_server(addr, state, server_shutdown)
                    .await
                    .context("API server failed")
            }),
        ));
    }

    supervise(tasks, &shutdown, config.service.grace_period()).await
}

/// Wait for a shutdown signal or the first task to exit, then give every
/// task `grace` to finish.
async fn supervise(
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
    shutdown: &Shutdown,
    grace: Duration,
) -> Result<()> {
    let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let mut pending = futures::future::select_all(handles);

    let early = tokio::select! {
        () = shutdown.triggered() => None,
        (joined, index, rest) = &mut pending => Some((joined, index, rest)),
    };
    shutdown.trigger();

    let (mut results, rest) = match early {
        Some((joined, index, rest)) => {
            warn!(task = names.get(index).copied().unwrap_or("task"), "Task exited before shutdown");
            (vec![joined], rest)
        }
        None => (Vec::new(), pending.into_inner()),
    };

    match tokio::time::timeout(grace, futures::future::join_all(rest)).await {
        Ok(joined) => results.extend(joined),
        Err(_) => warn!(grace_secs = grace.as_secs(), "Grace period elapsed, abandoning in-flight work"),
    }

    for joined in results {
        joined.context("Task panicked")??;
    }
    info!("Entropy stopped");
    Ok(())
}
