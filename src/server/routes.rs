//! HTTP route handlers for the bot endpoint.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, warn};

use crate::core::errors::BotError;
use crate::transport::activity::Activity;
use crate::transport::connector::TurnSink;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages", post(messages))
        .route("/api/files/{file_id}", get(assistant_file))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "genai-bot",
        "backend": state.handler.backend().kind().as_str(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn has_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}

/// Inbound Bot Framework activities.
async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> StatusCode {
    if state.require_auth && !has_bearer(&headers) {
        warn!("activity rejected: missing bearer token");
        return StatusCode::UNAUTHORIZED;
    }

    let sink = TurnSink::new(&state.connector, &activity);
    match state.handler.on_turn(&activity, &sink).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            error!(error = %err, "could not deliver reply");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Proxy generated assistant files referenced by image links.
async fn assistant_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Response {
    let Some(assistants) = state.handler.backend().assistants() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match assistants.file_content(&file_id).await {
        Ok(upstream) => {
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
            (
                [(header::CONTENT_TYPE, content_type)],
                Body::from_stream(upstream.bytes_stream()),
            )
                .into_response()
        }
        Err(BotError::HttpStatus { status: 404, .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(%file_id, error = %err, "file download failed");
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}
