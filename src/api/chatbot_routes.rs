//! Chatbot endpoints
//!
//! Creating a message kicks off an orchestrator run in a detached task so
//! the HTTP response returns before the stream finishes. Clients use the
//! returned `message_id` as the channel id for their SSE subscription:
//! `/api/v1/mq/channels/<message_id>/events`.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};
use validator::Validate;

use super::AppState;
use crate::error::{GatewayError, Result};
use crate::models::{MessageCreate, MessageCreateResponse, TaskCreate, TaskCreateResponse};
use crate::mq::sse;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task", post(create_task))
        .route("/message", post(create_message))
        .route("/stream/:run_id", get(stream_run_buffer))
}

/// POST /api/v1/chatbot/task
///
/// Creates a chat task bound to a freshly created agent thread.
async fn create_task(
    State(state): State<AppState>,
    Json(data): Json<TaskCreate>,
) -> Result<impl IntoResponse> {
    data.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let thread_id = state.agent.create_thread().await?;
    let task = state.store.create_task(&data, &thread_id).await?;

    info!(task_id = %task.task_id, thread_id = %task.thread_id, "Created chat task");

    Ok((
        StatusCode::CREATED,
        Json(TaskCreateResponse {
            task_id: task.task_id,
            thread_id: task.thread_id,
        }),
    ))
}

/// POST /api/v1/chatbot/message
///
/// Creates a chat message (or resumes a HITL one) and schedules the
/// orchestrator run. State-machine rejections (task already running, task
/// in an invalid state, message not awaiting input) surface here; the run
/// itself is spawned detached so it outlives this response.
async fn create_message(
    State(state): State<AppState>,
    Json(data): Json<MessageCreate>,
) -> Result<impl IntoResponse> {
    data.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let prepared = state.orchestrator.prepare_message_run(&data).await?;
    let message_id = prepared.message.message_id;

    info!(task_id = %prepared.task.task_id, message_id = %message_id,
        hitl_mode = prepared.hitl_mode, "Scheduling chat message run");

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run_message(prepared).await;
    });

    Ok((
        StatusCode::CREATED,
        Json(MessageCreateResponse { message_id }),
    ))
}

/// GET /api/v1/chatbot/stream/{run_id}
///
/// Follows a run's chunk buffer over SSE: backfills everything recorded
/// so far, then tails new entries until the `done` marker. Lets a client
/// that reconnects mid-run recover chunks it missed.
async fn stream_run_buffer(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Response {
    info!(run_id = %run_id, "Starting run buffer stream");

    let (tx, rx) = mpsc::unbounded_channel::<std::result::Result<Event, Infallible>>();
    let buffer = state.buffer.clone();

    tokio::spawn(async move {
        let mut last_id = "0-0".to_string();

        let backfilled = match buffer.backfill(&run_id, &last_id, 100).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run buffer backfill failed");
                let payload = sse::error_payload(&e.stored_message());
                let _ = tx.send(Ok(Event::default().event("error").data(payload.to_string())));
                return;
            }
        };

        for (entry_id, data) in backfilled {
            let done = sse::is_done(&data);
            last_id = entry_id;
            if tx
                .send(Ok(Event::default().data(data.to_string())))
                .is_err()
            {
                return;
            }
            if done {
                return;
            }
        }

        let mut tail = buffer.tail(&run_id, &last_id);
        while let Some((_, data)) = tail.next().await {
            let done = sse::is_done(&data);
            if tx
                .send(Ok(Event::default().data(data.to_string())))
                .is_err()
            {
                return;
            }
            if done {
                return;
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
