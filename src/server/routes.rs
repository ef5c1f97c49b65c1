//! REST handlers for the entity collections and the enrichment webhook.
//!
//! `owner_id` always comes from the authenticated key, never from the body.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use showtrack_core::{RemoteRecord, SyncEntity};

use super::auth::AuthUser;
use super::storage::EnrichmentRequest;
use super::AppState;

/// Error body: `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(kind: &str, id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "not_found",
            message: format!("{} {} not found", kind, id),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            error: "invalid",
            message: message.into(),
        }
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        tracing::error!(error = %e, "stored record could not be decoded");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "internal",
            message: "internal error".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Routes for one entity collection: `/{kind}` and `/{kind}/{id}`.
pub fn entity_routes<E>() -> Router<AppState>
where
    E: SyncEntity,
    E::Filter: DeserializeOwned,
{
    Router::new()
        .route(
            &format!("/{}", E::KIND),
            get(list_records::<E>).post(create_record::<E>),
        )
        .route(
            &format!("/{}/{{id}}", E::KIND),
            get(get_record::<E>)
                .patch(update_record::<E>)
                .delete(delete_record::<E>),
        )
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/enrich", post(enrich))
}

/// Decodes and validates a request body. Server-owned fields in the body
/// are ignored.
fn parse_payload<E: SyncEntity>(body: Value) -> Result<E, ApiError> {
    let payload: E = serde_json::from_value(body).map_err(|e| ApiError::invalid(e.to_string()))?;
    payload
        .validate()
        .map_err(|e| ApiError::invalid(e.to_string()))?;
    Ok(payload)
}

async fn create_record<E: SyncEntity>(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<RemoteRecord<E>>), ApiError> {
    let payload = parse_payload::<E>(body)?;
    let record = state
        .storage
        .insert(&user.owner_id, &payload)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(kind = E::KIND, id = %record.id, owner = %user.owner_id, "created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_records<E>(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(filter): Query<E::Filter>,
) -> Result<Json<Vec<RemoteRecord<E>>>, ApiError>
where
    E: SyncEntity,
    E::Filter: DeserializeOwned,
{
    let records = state
        .storage
        .list::<E>(&user.owner_id, &filter)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(records))
}

async fn get_record<E: SyncEntity>(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<RemoteRecord<E>>, ApiError> {
    state
        .storage
        .get::<E>(&user.owner_id, &id)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(E::KIND, &id))
}

async fn update_record<E: SyncEntity>(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<RemoteRecord<E>>, ApiError> {
    let payload = parse_payload::<E>(body)?;
    let record = state
        .storage
        .update(&user.owner_id, &id, &payload)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(E::KIND, &id))?;
    tracing::info!(kind = E::KIND, %id, version = record.version, "updated");
    Ok(Json(record))
}

async fn delete_record<E: SyncEntity>(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.storage.remove::<E>(&user.owner_id, &id).await {
        tracing::info!(kind = E::KIND, %id, "deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(E::KIND, &id))
    }
}

#[derive(Debug, Deserialize)]
struct EnrichBody {
    entity_kind: String,
    entity_id: String,
    #[allow(dead_code)]
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
}

/// Accepts an enrichment request. Processing happens elsewhere; the
/// reference server only records it.
async fn enrich(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<EnrichBody>,
) -> (StatusCode, Json<Accepted>) {
    tracing::info!(kind = %body.entity_kind, id = %body.entity_id, "enrichment requested");
    state
        .storage
        .record_enrichment(EnrichmentRequest {
            owner_id: user.owner_id,
            entity_kind: body.entity_kind,
            entity_id: body.entity_id,
        })
        .await;
    (StatusCode::ACCEPTED, Json(Accepted { status: "accepted" }))
}
