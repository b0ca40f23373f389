//! REST facade over the module dispatcher.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatcher::{InvocationResult, ModuleDispatcher};
use crate::error::{ConfigError, DispatchError, TransportError};
use crate::request::Attributes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ModuleDispatcher>,
}

/// Build the Axum router exposing dispatcher operations.
pub fn dispatch_routes(dispatcher: Arc<ModuleDispatcher>) -> Router {
    let state = AppState { dispatcher };

    Router::new()
        .route("/health", get(health))
        .route("/api/modules", get(list_modules))
        .route("/api/modules/{module}/health", get(module_health))
        .route("/api/modules/{module}/invoke", post(invoke_module))
        .route("/api/modules/{module}/upload", post(upload_file))
        .route("/api/omniquest/status/{job_id}", get(omniquest_status))
        .route("/api/media/video-status", post(video_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tensai-dispatch"
    }))
}

async fn module_health(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> impl IntoResponse {
    let healthy = state.dispatcher.check_health(&module).await;
    Json(serde_json::json!({
        "module": module,
        "healthy": healthy,
    }))
}

// ── Modules ─────────────────────────────────────────────────────────────

async fn list_modules(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.dispatcher.registry();
    let modules: Vec<_> = state
        .dispatcher
        .available_modules()
        .into_iter()
        .filter_map(|m| registry.config(m))
        .collect();
    Json(serde_json::json!({ "modules": modules }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeRequest {
    action: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    caller_id: Option<String>,
}

async fn invoke_module(
    State(state): State<AppState>,
    Path(module): Path<String>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return reject(rejection),
    };
    let result = state
        .dispatcher
        .invoke(&module, &body.action, &body.attributes, body.caller_id.as_deref())
        .await;
    respond(result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    files: Value,
    feature_type: String,
}

async fn upload_file(
    State(state): State<AppState>,
    Path(module): Path<String>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return reject(rejection),
    };
    let result = state
        .dispatcher
        .upload_file(&module, body.files, &body.feature_type)
        .await;
    respond(result)
}

// ── Long-running jobs ───────────────────────────────────────────────────

async fn omniquest_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    respond(state.dispatcher.check_omniquest_status(&job_id).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatusRequest {
    operation_id: String,
}

async fn video_status(
    State(state): State<AppState>,
    payload: Result<Json<VideoStatusRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return reject(rejection),
    };
    respond(state.dispatcher.check_video_status(&body.operation_id).await)
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn respond(result: Result<InvocationResult, DispatchError>) -> Response {
    match result {
        Ok(envelope) => {
            info!(module = %envelope.module, attempt = envelope.attempt, "Dispatch succeeded");
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            warn!(status = status.as_u16(), error = %e, "Dispatch failed");
            (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

/// Malformed request bodies keep axum's status but use the JSON error shape.
fn reject(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    warn!(status = status.as_u16(), error = %rejection.body_text(), "Rejected request body");
    (status, Json(serde_json::json!({"error": rejection.body_text()}))).into_response()
}

fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Config(ConfigError::UnknownModule(_)) => StatusCode::NOT_FOUND,
        DispatchError::Config(_) | DispatchError::Encode(_) => StatusCode::BAD_REQUEST,
        DispatchError::Transport {
            source: TransportError::InvalidRequest(_),
            ..
        } => StatusCode::BAD_REQUEST,
        DispatchError::Exhausted { .. } | DispatchError::Transport { .. } => StatusCode::BAD_GATEWAY,
    }
}
