//! `GET /healthz`.

use axum::{Json, extract::State};
use serde::Serialize;

use super::AppState;
use super::error::ApiResult;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    kinds: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        kinds: state.registry.kinds()?,
    }))
}
