//! SSE payload shaping for channel subscriptions
//!
//! Translates consumed `(entry_id, payload)` pairs into named SSE events.
//! Frame encoding itself (multi-line `data:` splitting, trailing blank
//! line) is handled by axum's `Event`; serialization here is compact JSON
//! with no whitespace between separators.

use serde_json::{json, Value};

/// Event name + payload for one consumed entry.
///
/// The event name is `"system"` for `done` markers, otherwise the
/// payload's own `type` (falling back to `"message"`). The data envelope
/// is `{id, type: "done"|"data", data, ts, channel}` where `ts` is the
/// millisecond prefix of the entry ID.
pub fn frame_for_entry(channel_id: &str, entry_id: &str, data: &Value) -> (String, Value) {
    let event_type = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("message")
        .to_string();
    let is_done = event_type == "done";

    let payload = json!({
        "id": entry_id,
        "type": if is_done { "done" } else { "data" },
        "data": data,
        "ts": entry_millis(entry_id),
        "channel": channel_id,
    });

    let event_name = if is_done { "system".to_string() } else { event_type };
    (event_name, payload)
}

/// Initial frame emitted as soon as a subscription opens.
pub fn connected_payload(consumer_id: &str) -> Value {
    json!({ "type": "connected", "consumer": consumer_id })
}

/// Final frame emitted when a subscription fails.
pub fn error_payload(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}

/// True when the payload is the terminal `done` marker.
pub fn is_done(data: &Value) -> bool {
    data.get("type").and_then(Value::as_str) == Some("done")
}

/// Millisecond timestamp encoded in an entry ID like "1763006032172-0".
pub fn entry_millis(entry_id: &str) -> i64 {
    entry_id
        .split('-')
        .next()
        .and_then(|ms| ms.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_millis_extraction() {
        assert_eq!(entry_millis("1763006032172-0"), 1_763_006_032_172);
        assert_eq!(entry_millis("not-an-id"), 0);
    }

    #[test]
    fn test_data_frames_use_payload_type_as_event_name() {
        let data = json!({ "type": "model_stream_chunk", "payload": { "message": "hi" } });
        let (event, payload) = frame_for_entry("chan-1", "1763006032172-0", &data);

        assert_eq!(event, "model_stream_chunk");
        assert_eq!(payload["type"], "data");
        assert_eq!(payload["id"], "1763006032172-0");
        assert_eq!(payload["ts"], 1_763_006_032_172i64);
        assert_eq!(payload["channel"], "chan-1");
        assert_eq!(payload["data"], data);
    }

    #[test]
    fn test_done_frames_are_system_events() {
        let data = json!({ "type": "done" });
        let (event, payload) = frame_for_entry("chan-1", "1-0", &data);

        assert_eq!(event, "system");
        assert_eq!(payload["type"], "done");
        assert!(is_done(&data));
    }

    #[test]
    fn test_untyped_payload_defaults_to_message() {
        let data = json!({ "text": "hello" });
        let (event, payload) = frame_for_entry("chan-1", "1-0", &data);

        assert_eq!(event, "message");
        assert_eq!(payload["type"], "data");
    }

    #[test]
    fn test_connected_and_error_payloads() {
        let connected = connected_payload("consumer-1");
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["consumer"], "consumer-1");

        let error = error_payload("boom");
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "boom");
    }
}
