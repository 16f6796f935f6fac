// HTTP handlers: version, upstream events, resource registration and queries

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use super::AppState;
use crate::catalog::CatalogError;
use crate::feed::FeedError;
use crate::resource::ResourceInit;
use crate::tally::{ResourceKey, ResourceType};

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            FeedError::Catalog(CatalogError::Resource(_)) => StatusCode::BAD_REQUEST,
            FeedError::Catalog(CatalogError::AlreadyRegistered(_)) => StatusCode::CONFLICT,
            FeedError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            FeedError::WorkerGone => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, self)
    }
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /api/events: accepts any JSON; malformed events are logged and dropped by the worker.
pub(super) async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> Result<StatusCode, FeedError> {
    state.catalog.publish(event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/resources: registers a resource from its initial payload.
pub(super) async fn register_resource(
    State(state): State<AppState>,
    Json(init): Json<ResourceInit>,
) -> Result<Response, FeedError> {
    let snapshot = state.catalog.register(init).await?;
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

pub(super) async fn list_resources(State(state): State<AppState>) -> Result<Response, FeedError> {
    let snapshots = state.catalog.snapshots(None).await?;
    Ok(Json(snapshots).into_response())
}

fn key_from_path(kind: &str, id: Option<String>) -> Option<ResourceKey> {
    let kind = ResourceType::parse(kind)?;
    match (kind.is_collection(), id) {
        (true, None) => Some(ResourceKey::collection(kind)),
        (false, Some(id)) => Some(ResourceKey::named(kind, id)),
        _ => None,
    }
}

async fn get_one(state: &AppState, key: Option<ResourceKey>) -> Result<Response, FeedError> {
    let Some(key) = key else {
        return Ok(error_response(StatusCode::NOT_FOUND, "unknown resource path"));
    };
    let snapshots = state.catalog.snapshots(Some(key.clone())).await?;
    match snapshots.into_iter().next() {
        Some(snapshot) => Ok(Json(snapshot).into_response()),
        None => Err(CatalogError::NotFound(key).into()),
    }
}

async fn delete_one(state: &AppState, key: Option<ResourceKey>) -> Result<Response, FeedError> {
    let Some(key) = key else {
        return Ok(error_response(StatusCode::NOT_FOUND, "unknown resource path"));
    };
    if state.catalog.remove(key.clone()).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(CatalogError::NotFound(key).into())
    }
}

pub(super) async fn get_collection(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, FeedError> {
    get_one(&state, key_from_path(&kind, None)).await
}

pub(super) async fn get_named(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Response, FeedError> {
    get_one(&state, key_from_path(&kind, Some(id))).await
}

pub(super) async fn delete_collection(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, FeedError> {
    delete_one(&state, key_from_path(&kind, None)).await
}

pub(super) async fn delete_named(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Response, FeedError> {
    delete_one(&state, key_from_path(&kind, Some(id))).await
}
