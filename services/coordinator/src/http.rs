//! HTTP surface of the coordinator.
//!
//! Authentication happens in front of this service; the authenticated client
//! identity arrives in the `x-client-id` header.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secagg_core::{Contribution, MaskedCiphertext, SecureAggError};
use serde_json::json;
use tracing::error;

use crate::federation::FederationModule;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

pub type AppState = Arc<FederationModule>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/update", post(submit_update))
        .route("/api/v1/aggregate", post(perform_aggregation))
        .route("/api/v1/round", get(round_status))
        .route("/api/v1/model", get(model_snapshot))
        .route("/api/v1/rounds", get(round_history))
        .route("/api/v1/admin/recover", post(recover))
        .merge(secagg_core::health_router())
        .with_state(state)
}

pub fn status_for(err: &SecureAggError) -> StatusCode {
    match err {
        SecureAggError::SchemaMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SecureAggError::DuplicateClient { .. } | SecureAggError::RoundMismatch { .. } => StatusCode::CONFLICT,
        SecureAggError::RoundNotCollecting { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SecureAggError::InsufficientContributions { .. } => StatusCode::BAD_REQUEST,
        SecureAggError::StaleAggregate { .. } => StatusCode::CONFLICT,
        SecureAggError::RoundAborted { .. }
        | SecureAggError::ApplyFailed { .. }
        | SecureAggError::SchemaChanged { .. }
        | SecureAggError::InvalidThreshold(_)
        | SecureAggError::EmptySchema => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &SecureAggError) -> Response {
    let message = match err {
        SecureAggError::InsufficientContributions { .. } => "Not enough contributions".to_string(),
        other => other.to_string(),
    };
    (status_for(err), Json(json!({ "error": err.code(), "message": message }))).into_response()
}

async fn submit_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Contribution<MaskedCiphertext>>,
) -> Response {
    let Some(client_id) = headers.get(CLIENT_ID_HEADER).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthenticated" }))).into_response();
    };
    match state.controller().submit(client_id, body) {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted", "round_id": accepted.round_id, "ready": accepted.ready }))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn perform_aggregation(State(state): State<AppState>) -> Response {
    let worker = state.clone();
    let outcome = match tokio::task::spawn_blocking(move || worker.controller().run_round()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "aggregation task failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "aggregation_task_failed" }))).into_response();
        }
    };
    match outcome {
        Ok(summary) => {
            state.publish_round_closed(&summary).await;
            (StatusCode::OK, Json(json!({ "status": "aggregation complete", "round": summary }))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn round_status(State(state): State<AppState>) -> Response {
    Json(state.controller().status()).into_response()
}

async fn model_snapshot(State(state): State<AppState>) -> Response {
    Json(state.model().snapshot()).into_response()
}

async fn round_history(State(state): State<AppState>) -> Response {
    Json(state.controller().history()).into_response()
}

async fn recover(State(state): State<AppState>) -> Response {
    match state.controller().recover() {
        Ok(recovered) => Json(json!({ "recovered": recovered, "round": state.controller().status() })).into_response(),
        Err(e) => error_response(&e),
    }
}
