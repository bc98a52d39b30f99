//! HTTP API.
//!
//! - `POST /v1/resources`, `GET /v1/resources?kind=&project=&label.<key>=`
//! - `GET|PATCH|DELETE /v1/resources/{urn}`
//! - `POST /v1/resources/{urn}/actions/{action}`
//! - `GET /v1/resources/{urn}/revisions`
//! - `GET /v1/resources/{urn}/logs` (NDJSON)
//! - `POST /v1/modules`, `GET /v1/modules?project=`
//! - `GET|PATCH|DELETE /v1/modules/{urn}`
//! - `GET /healthz`
//!
//! Writes take the caller identity from the `user-id` header.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use entropy_module::Registry;
use entropy_service::{ModuleService, ResourceService};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod error;
pub mod health;
pub mod modules;
pub mod resources;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub resources: Arc<ResourceService>,
    pub modules: Arc<ModuleService>,
    pub registry: Arc<Registry>,
}

pub fn create_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/resources",
            post(resources::create_resource).get(resources::list_resources),
        )
        .route(
            "/resources/{urn}",
            get(resources::get_resource)
                .patch(resources::update_resource)
                .delete(resources::delete_resource),
        )
        .route(
            "/resources/{urn}/actions/{action}",
            post(resources::apply_action),
        )
        .route("/resources/{urn}/revisions", get(resources::get_revisions))
        .route("/resources/{urn}/logs", get(resources::get_log))
        .route(
            "/modules",
            post(modules::create_module).get(modules::list_modules),
        )
        .route(
            "/modules/{urn}",
            get(modules::get_module)
                .patch(modules::update_module)
                .delete(modules::delete_module),
        );

    Router::new()
        .nest("/v1", v1)
        .route("/healthz", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain open connections.
pub async fn run_server<F>(addr: SocketAddr, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Entropy API listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
