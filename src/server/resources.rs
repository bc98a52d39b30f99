//! `/v1/resources` handlers.

use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use entropy_core::{
    Actor, Error, Filter, Resource, Revision, RevisionsSelector, Spec, USER_ID_HEADER, UpdateRequest,
};
use entropy_module::{ActionRequest, LogFilter};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use super::error::ApiResult;

/// Query parameter prefix selecting labels, e.g. `label.team=data`.
const LABEL_PREFIX: &str = "label.";

#[derive(Debug, Deserialize)]
pub struct CreateResourceBody {
    pub kind: String,
    pub project: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: Spec,
}

impl CreateResourceBody {
    fn into_resource(self) -> Resource {
        let mut res = Resource::new(self.kind, self.project, self.name);
        res.labels = self.labels;
        res.spec = self.spec;
        res
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionBody {
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

pub(super) fn actor(headers: &HeaderMap) -> Actor {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Actor::new)
        .unwrap_or_default()
}

fn filter_from(query: BTreeMap<String, String>) -> Filter {
    query
        .into_iter()
        .fold(Filter::default(), |filter, (key, value)| match key.as_str() {
            "kind" => filter.with_kind(value),
            "project" => filter.with_project(value),
            other => match other.strip_prefix(LABEL_PREFIX) {
                Some(label) => filter.with_label(label, value),
                None => filter,
            },
        })
}

pub async fn create_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateResourceBody>,
) -> ApiResult<(StatusCode, Json<Resource>)> {
    let created = state
        .resources
        .create_resource(&actor(&headers), body.into_resource())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<Vec<Resource>>> {
    Ok(Json(state.resources.list_resources(&filter_from(query)).await?))
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path(urn): Path<String>,
) -> ApiResult<Json<Resource>> {
    Ok(Json(state.resources.get_resource(&urn).await?))
}

pub async fn update_resource(
    State(state): State<AppState>,
    Path(urn): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Json<Resource>> {
    Ok(Json(
        state
            .resources
            .update_resource(&actor(&headers), &urn, req)
            .await?,
    ))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path(urn): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.resources.delete_resource(&actor(&headers), &urn).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn apply_action(
    State(state): State<AppState>,
    Path((urn, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Option<Json<ActionBody>>,
) -> ApiResult<Json<Resource>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = ActionRequest {
        name: action,
        params: body.params,
        labels: body.labels,
    };
    Ok(Json(
        state
            .resources
            .apply_action(&actor(&headers), &urn, request)
            .await?,
    ))
}

pub async fn get_revisions(
    State(state): State<AppState>,
    Path(urn): Path<String>,
) -> ApiResult<Json<Vec<Revision>>> {
    let selector = RevisionsSelector { urn };
    Ok(Json(state.resources.get_revisions(&selector).await?))
}

/// Stream log chunks as newline-delimited JSON.
pub async fn get_log(
    State(state): State<AppState>,
    Path(urn): Path<String>,
    Query(filter): Query<LogFilter>,
) -> ApiResult<Response> {
    let stream = state.resources.get_log(&urn, filter).await?;
    let lines = stream.map(|chunk| {
        chunk.and_then(|chunk| {
            let mut line = serde_json::to_vec(&chunk)
                .map_err(|e| Error::internal("failed to encode log chunk").with_cause(e))?;
            line.push(b'\n');
            Ok(line)
        })
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
