//! Message queue endpoints
//!
//! Channel surface over the Redis Streams queue: POST a message, follow a
//! channel over SSE, inspect it, delete it. Every SSE subscription gets
//! its own consumer group so each connected client observes the entire
//! stream (broadcast), not a share of it.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::error::{GatewayError, Result};
use crate::mq::{sse, ConsumeOptions, ReadMode, StreamStart};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels/:channel_id/messages", post(send_message))
        .route("/channels/:channel_id/events", get(subscribe_events))
        .route("/channels/:channel_id/info", get(channel_info))
        .route("/channels/:channel_id", delete(delete_channel))
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Incoming message payload
#[derive(Debug, Deserialize, Validate)]
pub struct MessageIn {
    #[validate(length(min = 1, max = 255))]
    pub sender: String,
    #[validate(length(min = 1))]
    pub text: String,
    pub client_id: Option<String>,
}

/// Outgoing message response
#[derive(Debug, Serialize)]
pub struct MessageOut {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub ts: i64,
}

/// Stream method for SSE subscriptions
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum StreamMethod {
    /// Replay from the beginning, then tail
    #[serde(rename = "s")]
    FromBeginning,
    /// New entries only
    #[serde(rename = "n")]
    NewOnly,
    /// This consumer's pending entries first, then new entries
    #[serde(rename = "p")]
    Pending,
}

impl StreamMethod {
    fn consume_options(self, group_id: String) -> ConsumeOptions {
        let opts = ConsumeOptions::new(group_id).auto_ack(false);
        match self {
            StreamMethod::FromBeginning => opts
                .start(StreamStart::FromBeginning)
                .mode(ReadMode::NewEntries),
            StreamMethod::NewOnly => opts.start(StreamStart::NewOnly).mode(ReadMode::NewEntries),
            StreamMethod::Pending => opts
                .start(StreamStart::FromBeginning)
                .mode(ReadMode::PendingEntries),
        }
    }
}

fn default_method() -> StreamMethod {
    StreamMethod::FromBeginning
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub consumer: Option<String>,
    #[serde(default = "default_method")]
    pub method: StreamMethod,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/mq/channels/{channel_id}/messages
///
/// Sends a message to a channel; it is broadcast to all consumers
/// listening on it.
async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(payload): Json<MessageIn>,
) -> Result<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let mut data = Map::new();
    data.insert("sender".to_string(), Value::String(payload.sender.clone()));
    data.insert("text".to_string(), Value::String(payload.text.clone()));
    data.insert("type".to_string(), Value::String("message".to_string()));
    if let Some(client_id) = &payload.client_id {
        data.insert("client_id".to_string(), Value::String(client_id.clone()));
    }

    let entry_id = state.rsmq.send(&channel_id, &Value::Object(data)).await?;
    info!(channel = %channel_id, entry_id = %entry_id, "Sent message to channel");

    Ok((
        StatusCode::CREATED,
        Json(MessageOut {
            ts: sse::entry_millis(&entry_id),
            id: entry_id,
            sender: payload.sender,
            text: payload.text,
        }),
    ))
}

/// GET /api/v1/mq/channels/{channel_id}/events
///
/// Subscribes to a channel over Server-Sent Events. Each client gets its
/// own consumer group (broadcast semantics) and an auto-generated
/// consumer id unless one is supplied. The stream closes after the
/// terminal `done` frame.
async fn subscribe_events(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let consumer_id = query
        .consumer
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let group_id = state.rsmq.config().broadcast_group(&consumer_id);
    let opts = query.method.consume_options(group_id);

    info!(channel = %channel_id, consumer = %consumer_id, method = ?query.method,
        "Starting SSE stream");

    let (tx, rx) = mpsc::unbounded_channel::<std::result::Result<Event, Infallible>>();

    // Immediate connection frame, before the first upstream read
    let connected = sse::connected_payload(&consumer_id);
    let _ = tx.send(Ok(Event::default().event("system").data(connected.to_string())));

    let rsmq = state.rsmq.clone();
    tokio::spawn(async move {
        // The channel sender doubles as the disconnect probe: axum drops
        // the receiver when the client goes away.
        let disconnect_probe = tx.clone();
        let mut entries = rsmq.consume_with_disconnect_check(
            &channel_id,
            &consumer_id,
            move || disconnect_probe.is_closed(),
            opts,
        );

        while let Some(next) = entries.next().await {
            let (entry_id, data) = match next {
                Ok(entry) => entry,
                Err(e) => {
                    // A consume failure that survived the pump's retries:
                    // emit the error frame, then close
                    error!(channel = %channel_id, consumer = %consumer_id, error = %e,
                        "SSE subscription failed");
                    let payload = sse::error_payload(&e.stored_message());
                    let _ = tx.send(Ok(Event::default()
                        .event("error")
                        .data(payload.to_string())));
                    break;
                }
            };

            let done = sse::is_done(&data);
            let (event_name, payload) = sse::frame_for_entry(&channel_id, &entry_id, &data);

            if tx
                .send(Ok(Event::default().event(event_name).data(payload.to_string())))
                .is_err()
            {
                break;
            }

            if done {
                debug!(channel = %channel_id, "Done marker received, closing stream");
                break;
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));

    response
}

/// GET /api/v1/mq/channels/{channel_id}/info
///
/// Returns stream info, consumer group info and active consumers of the
/// default group.
async fn channel_info(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<Value>> {
    let length = state.rsmq.length(&channel_id).await.unwrap_or(0);
    let stream_info = state.rsmq.info(&channel_id).await;
    let group_info = state.rsmq.group_info(&channel_id).await;
    let consumers = state
        .rsmq
        .consumers_info(&channel_id, &state.rsmq.config().default_group())
        .await;

    Ok(Json(json!({
        "channel_id": channel_id,
        "length": length,
        "stream_info": stream_info,
        "group_info": group_info,
        "consumers": consumers,
    })))
}

/// DELETE /api/v1/mq/channels/{channel_id}
///
/// Deletes a channel and all its entries.
async fn delete_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<Value>> {
    let deleted = state.rsmq.delete(&channel_id).await?;
    info!(channel = %channel_id, deleted = deleted, "Deleted channel");

    Ok(Json(json!({
        "channel_id": channel_id,
        "deleted": deleted > 0,
    })))
}
