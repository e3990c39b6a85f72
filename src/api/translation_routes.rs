//! File translation endpoints
//!
//! Creating a translation loads the preset and original text, creates the
//! row, and schedules the translation orchestrator in a detached task.
//! The response carries a freshly minted `rsmq_channel_id`; clients
//! subscribe to `/api/v1/mq/channels/<rsmq_channel_id>/events` to follow
//! the run.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;
use validator::Validate;

use super::AppState;
use crate::error::{GatewayError, Result};
use crate::models::{TranslationCreate, TranslationCreateResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(create_translation))
}

/// POST /api/v1/translation
async fn create_translation(
    State(state): State<AppState>,
    Json(data): Json<TranslationCreate>,
) -> Result<impl IntoResponse> {
    data.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let prepared = state.orchestrator.prepare_translation_run(&data).await?;
    let response = TranslationCreateResponse {
        translation_id: prepared.translation_id,
        rsmq_channel_id: prepared.rsmq_channel_id.clone(),
    };

    info!(translation_id = %prepared.translation_id,
        channel = %prepared.rsmq_channel_id,
        agent = %prepared.preset.ai_agent_id,
        "Scheduling translation run");

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run_translation(prepared).await;
    });

    Ok((StatusCode::CREATED, Json(response)))
}
