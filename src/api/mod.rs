//! HTTP API
//!
//! Axum router over the gateway's surface: the message-queue endpoints
//! (send / SSE subscribe / info / delete), the chatbot task + message
//! endpoints and the translation endpoint. Authentication is handled by
//! upstream middleware and is not part of this service.

pub mod chatbot_routes;
pub mod mq_routes;
pub mod translation_routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use crate::agent::AgentClient;
use crate::error::GatewayError;
use crate::mq::{RunBuffer, Rsmq};
use crate::orchestrator::Orchestrator;
use crate::store::Store;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rsmq: Rsmq,
    pub buffer: RunBuffer,
    pub store: Store,
    pub agent: Arc<AgentClient>,
    pub orchestrator: Orchestrator,
}

/// Builds the application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/mq", mq_routes::router())
        .nest("/api/v1/chatbot", chatbot_routes::router())
        .nest("/api/v1/translation", translation_routes::router())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lingo-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            GatewayError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            GatewayError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            GatewayError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            GatewayError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Cannot connect to agent service".to_string(),
            ),
            GatewayError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "Agent service timeout".to_string(),
            ),
            GatewayError::UpstreamHttp { status, .. } => (
                StatusCode::BAD_GATEWAY,
                format!("Agent service error: {status}"),
            ),
            // Internals never leak to clients
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
