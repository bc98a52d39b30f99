//! `/v1/modules` handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use entropy_core::Module;
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use super::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct CreateModuleBody {
    pub project: String,
    /// Kind the module configures.
    pub name: String,
    #[serde(default)]
    pub configs: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateModuleBody {
    pub configs: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListModulesQuery {
    pub project: Option<String>,
}

pub async fn create_module(
    State(state): State<AppState>,
    Json(body): Json<CreateModuleBody>,
) -> ApiResult<(StatusCode, Json<Module>)> {
    let module = Module::new(body.project, body.name, body.configs);
    Ok((StatusCode::CREATED, Json(state.modules.create_module(module).await?)))
}

pub async fn list_modules(
    State(state): State<AppState>,
    Query(query): Query<ListModulesQuery>,
) -> ApiResult<Json<Vec<Module>>> {
    Ok(Json(state.modules.list_modules(query.project.as_deref()).await?))
}

pub async fn get_module(State(state): State<AppState>, Path(urn): Path<String>) -> ApiResult<Json<Module>> {
    Ok(Json(state.modules.get_module(&urn).await?))
}

pub async fn update_module(
    State(state): State<AppState>,
    Path(urn): Path<String>,
    Json(body): Json<UpdateModuleBody>,
) -> ApiResult<Json<Module>> {
    Ok(Json(state.modules.update_module(&urn, body.configs).await?))
}

pub async fn delete_module(State(state): State<AppState>, Path(urn): Path<String>) -> ApiResult<StatusCode> {
    state.modules.delete_module(&urn).await?;
    Ok(StatusCode::NO_CONTENT)
}
