//! Normalized agent stream chunks
//!
//! The agent runtime streams loosely-shaped JSON; `parse_chunk` maps each
//! raw chunk onto a tagged union so downstream code never touches the
//! wire shape. Unknown chunk events are dropped.

use serde_json::Value;

/// One raw frame off the agent's event stream.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub event: String,
    pub data: Value,
}

/// A normalized agent chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedChunk {
    /// Emitted once at run start.
    Metadata { run_id: String },

    /// Full state snapshot after a node executes.
    Values {
        messages: Vec<Value>,
        is_interrupted: bool,
        interrupt_msg: Option<String>,
    },

    /// Node lifecycle: a node started (has `input`) or completed (has `result`).
    Tasks {
        task_id: String,
        task_name: String,
        task_error: Option<String>,
        task_triggers: Vec<String>,
        is_node_started: bool,
        is_node_completed: bool,
        is_interrupted: bool,
        interrupt_msg: Option<String>,
    },

    /// Delta output of one node.
    Updates {
        node_name: String,
        node_output: Value,
        is_interrupted: bool,
        interrupt_msg: Option<String>,
    },

    /// Per-token model lifecycle event.
    Events {
        event_name: String,
        is_ai_message: bool,
        is_tool_call: bool,
        event_data: Value,
        chunk_data: Option<String>,
    },
}

impl ParsedChunk {
    /// Tag used when re-broadcasting the chunk to stream subscribers.
    pub fn variant_tag(&self) -> &'static str {
        match self {
            ParsedChunk::Metadata { .. } => "metadata",
            ParsedChunk::Values { .. } => "values",
            ParsedChunk::Tasks { .. } => "tasks",
            ParsedChunk::Updates { .. } => "updates",
            ParsedChunk::Events { .. } => "events",
        }
    }

    pub fn is_interrupted(&self) -> bool {
        match self {
            ParsedChunk::Values { is_interrupted, .. }
            | ParsedChunk::Tasks { is_interrupted, .. }
            | ParsedChunk::Updates { is_interrupted, .. } => *is_interrupted,
            _ => false,
        }
    }

    pub fn interrupt_msg(&self) -> Option<&str> {
        match self {
            ParsedChunk::Values { interrupt_msg, .. }
            | ParsedChunk::Tasks { interrupt_msg, .. }
            | ParsedChunk::Updates { interrupt_msg, .. } => interrupt_msg.as_deref(),
            _ => None,
        }
    }
}

/// Parses one raw chunk into its normalized form.
///
/// Pure function over a single chunk; ordering is the caller's concern.
pub fn parse_chunk(chunk: &RawChunk) -> Option<ParsedChunk> {
    match chunk.event.as_str() {
        "metadata" => parse_metadata(&chunk.data),
        "values" => parse_values(&chunk.data),
        "tasks" => parse_tasks(&chunk.data),
        "updates" => parse_updates(&chunk.data),
        "events" => parse_events(&chunk.data),
        _ => None,
    }
}

fn parse_metadata(data: &Value) -> Option<ParsedChunk> {
    let run_id = data.get("run_id")?.as_str()?.to_string();
    Some(ParsedChunk::Metadata { run_id })
}

fn parse_values(data: &Value) -> Option<ParsedChunk> {
    let messages = data
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let (is_interrupted, interrupt_msg) = interrupt_of(data.get("__interrupt__"));

    Some(ParsedChunk::Values {
        messages,
        is_interrupted,
        interrupt_msg,
    })
}

fn parse_tasks(data: &Value) -> Option<ParsedChunk> {
    let task_id = data.get("id")?.as_str()?.to_string();
    let task_name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let task_error = data
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);
    let task_triggers = data
        .get("triggers")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // A task chunk carries `input` when the node starts and `result` when
    // it finishes.
    let is_node_started = data.get("input").is_some();
    let is_node_completed = data.get("result").is_some();
    let (is_interrupted, interrupt_msg) = interrupt_of(data.get("interrupts"));

    Some(ParsedChunk::Tasks {
        task_id,
        task_name,
        task_error,
        task_triggers,
        is_node_started,
        is_node_completed,
        is_interrupted,
        interrupt_msg,
    })
}

fn parse_updates(data: &Value) -> Option<ParsedChunk> {
    let object = data.as_object()?;
    let (is_interrupted, interrupt_msg) = interrupt_of(object.get("__interrupt__"));

    // The update is keyed by the producing node; an interrupt-only update
    // keeps the sentinel key as its node name.
    let node_name = object
        .keys()
        .find(|k| *k != "__interrupt__")
        .cloned()
        .unwrap_or_else(|| "__interrupt__".to_string());
    let node_output = object.get(&node_name).cloned().unwrap_or(Value::Null);

    Some(ParsedChunk::Updates {
        node_name,
        node_output,
        is_interrupted,
        interrupt_msg,
    })
}

fn parse_events(data: &Value) -> Option<ParsedChunk> {
    let event_name = data.get("event")?.as_str()?.to_string();
    if !matches!(
        event_name.as_str(),
        "on_chat_model_start" | "on_chat_model_stream" | "on_chat_model_end"
    ) {
        return None;
    }

    let message_chunk = data.get("data").and_then(|d| d.get("chunk"));
    let is_ai_chunk = message_chunk
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
        == Some("AIMessageChunk");

    let text_content = message_chunk
        .and_then(|c| c.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    let tool_call_args = message_chunk
        .and_then(|c| c.get("tool_call_chunks"))
        .and_then(Value::as_array)
        .and_then(|chunks| {
            chunks
                .iter()
                .filter_map(|tc| tc.get("args").and_then(Value::as_str))
                .find(|args| !args.is_empty())
        });

    let is_ai_message = is_ai_chunk && text_content.is_some();
    let is_tool_call = tool_call_args.is_some();
    let chunk_data = text_content.or(tool_call_args).map(str::to_string);

    Some(ParsedChunk::Events {
        event_name,
        is_ai_message,
        is_tool_call,
        event_data: data.clone(),
        chunk_data,
    })
}

/// Extracts interrupt presence and its human-facing message from an
/// `__interrupt__` / `interrupts` list: `[{ "value": { "msg": … }, … }]`.
fn interrupt_of(list: Option<&Value>) -> (bool, Option<String>) {
    let Some(list) = list else {
        return (false, None);
    };

    let is_interrupted = match list.as_array() {
        Some(arr) => !arr.is_empty(),
        None => false,
    };
    let msg = list
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|item| item.get("value"))
        .and_then(|value| value.get("msg"))
        .and_then(Value::as_str)
        .map(str::to_string);

    (is_interrupted, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(event: &str, data: Value) -> RawChunk {
        RawChunk {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn test_metadata_chunk_carries_run_id() {
        let chunk = raw(
            "metadata",
            json!({ "run_id": "019ae54a-ef8f-743a-8173-16d4a7c64f91", "attempt": 1 }),
        );
        assert_eq!(
            parse_chunk(&chunk),
            Some(ParsedChunk::Metadata {
                run_id: "019ae54a-ef8f-743a-8173-16d4a7c64f91".to_string()
            })
        );
    }

    #[test]
    fn test_task_start_and_completion_flags() {
        let started = raw(
            "tasks",
            json!({
                "id": "t-1",
                "name": "upload_original_text",
                "input": { "messages": [] },
                "triggers": ["branch:to:upload_original_text"],
            }),
        );
        match parse_chunk(&started).unwrap() {
            ParsedChunk::Tasks {
                task_name,
                task_triggers,
                is_node_started,
                is_node_completed,
                ..
            } => {
                assert_eq!(task_name, "upload_original_text");
                assert_eq!(task_triggers, vec!["branch:to:upload_original_text"]);
                assert!(is_node_started);
                assert!(!is_node_completed);
            }
            other => panic!("unexpected variant: {other:?}"),
        }

        let completed = raw(
            "tasks",
            json!({ "id": "t-1", "name": "upload_original_text", "error": null,
                    "result": {}, "interrupts": [] }),
        );
        match parse_chunk(&completed).unwrap() {
            ParsedChunk::Tasks {
                is_node_completed,
                is_interrupted,
                task_error,
                ..
            } => {
                assert!(is_node_completed);
                assert!(!is_interrupted);
                assert!(task_error.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_task_surfaces_message() {
        let chunk = raw(
            "tasks",
            json!({
                "id": "t-2",
                "name": "analyze_original_text",
                "result": {},
                "interrupts": [{ "value": { "cause": "ASKU found",
                                            "msg": "Please specify target language" },
                                 "id": "i-1" }],
            }),
        );
        let parsed = parse_chunk(&chunk).unwrap();
        assert!(parsed.is_interrupted());
        assert_eq!(parsed.interrupt_msg(), Some("Please specify target language"));
    }

    #[test]
    fn test_update_chunk_keyed_by_node() {
        let chunk = raw(
            "updates",
            json!({ "upload_original_text": { "options": { "temperature": 0.0 } } }),
        );
        match parse_chunk(&chunk).unwrap() {
            ParsedChunk::Updates {
                node_name,
                node_output,
                is_interrupted,
                ..
            } => {
                assert_eq!(node_name, "upload_original_text");
                assert_eq!(node_output["options"]["temperature"], 0.0);
                assert!(!is_interrupted);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_interrupt_only_update() {
        let chunk = raw(
            "updates",
            json!({ "__interrupt__": [{ "value": { "msg": "Please specify target language" },
                                        "id": "i-2" }] }),
        );
        let parsed = parse_chunk(&chunk).unwrap();
        assert!(parsed.is_interrupted());
        assert_eq!(parsed.interrupt_msg(), Some("Please specify target language"));
    }

    #[test]
    fn test_ai_text_event_chunk() {
        let chunk = raw(
            "events",
            json!({
                "event": "on_chat_model_stream",
                "data": { "chunk": {
                    "content": "┼Hey",
                    "type": "AIMessageChunk",
                    "tool_calls": [],
                    "tool_call_chunks": [],
                } },
            }),
        );
        match parse_chunk(&chunk).unwrap() {
            ParsedChunk::Events {
                is_ai_message,
                is_tool_call,
                chunk_data,
                ..
            } => {
                assert!(is_ai_message);
                assert!(!is_tool_call);
                assert_eq!(chunk_data.as_deref(), Some("┼Hey"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_event_chunk() {
        let chunk = raw(
            "events",
            json!({
                "event": "on_chat_model_stream",
                "data": { "chunk": {
                    "content": [{ "partial_json": " \"info\"", "type": "input_json_delta" }],
                    "type": "AIMessageChunk",
                    "tool_call_chunks": [{ "name": null, "args": " \"info\"", "index": 0 }],
                } },
            }),
        );
        match parse_chunk(&chunk).unwrap() {
            ParsedChunk::Events {
                is_ai_message,
                is_tool_call,
                chunk_data,
                ..
            } => {
                assert!(!is_ai_message);
                assert!(is_tool_call);
                assert_eq!(chunk_data.as_deref(), Some(" \"info\""));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_chunks_are_dropped() {
        assert!(parse_chunk(&raw("checkpoints", json!({}))).is_none());
        assert!(parse_chunk(&raw("events", json!({ "event": "on_chain_start" }))).is_none());
        assert!(parse_chunk(&raw("metadata", json!({ "attempt": 1 }))).is_none());
    }

    #[test]
    fn test_values_snapshot_with_interrupt() {
        let chunk = raw(
            "values",
            json!({
                "messages": [{ "type": "human", "content": "안녕?" }],
                "__interrupt__": [{ "value": { "msg": "Which language?" }, "id": "i-3" }],
            }),
        );
        match parse_chunk(&chunk).unwrap() {
            ParsedChunk::Values {
                messages,
                is_interrupted,
                interrupt_msg,
            } => {
                assert_eq!(messages.len(), 1);
                assert!(is_interrupted);
                assert_eq!(interrupt_msg.as_deref(), Some("Which language?"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
