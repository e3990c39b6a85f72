//! HTTP client for the agent runtime
//!
//! Runs stream back as Server-Sent Events; the parser below reassembles
//! frames across byte-chunk boundaries and yields `RawChunk { event, data }`
//! pairs in arrival order.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use super::{AssistantId, RawChunk};
use crate::error::{GatewayError, Result};

const STREAM_CHANNEL_CAPACITY: usize = 64;

pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    /// Bound on non-streaming calls; streaming reads are bounded by the
    /// connect timeout plus the run's own lifecycle.
    request_timeout: Duration,
}

impl AgentClient {
    /// Creates a client for the agent runtime at `base_url`.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .user_agent(format!("lingo-gateway/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Creates a new agent thread and returns its ID.
    pub async fn create_thread(&self) -> Result<String> {
        let url = format!("{}/threads", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&json!({}))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: Value = response.json().await?;
        body.get("thread_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Unavailable("Agent thread response missing thread_id".to_string())
            })
    }

    /// Starts a new run on a thread and streams its chunks.
    pub async fn run_new_task(
        &self,
        user_id: &str,
        task_id: &str,
        thread_id: &str,
        assistant_id: AssistantId,
        prompt: &str,
    ) -> Result<ReceiverStream<Result<RawChunk>>> {
        let body = json!({
            "assistant_id": assistant_id.as_str(),
            "input": { "messages": [{ "type": "human", "content": prompt }] },
            "config": { "configurable": { "user_id": user_id } },
            "stream_mode": ["updates", "tasks", "events"],
        });
        self.open_stream(user_id, task_id, thread_id, body).await
    }

    /// Resumes an interrupted run with a human answer (human-in-the-loop).
    pub async fn run_hitl_task(
        &self,
        user_id: &str,
        task_id: &str,
        thread_id: &str,
        assistant_id: AssistantId,
        resume_msg: &str,
    ) -> Result<ReceiverStream<Result<RawChunk>>> {
        let body = json!({
            "assistant_id": assistant_id.as_str(),
            "input": null,
            "command": { "resume": resume_msg },
            "config": { "configurable": { "user_id": user_id } },
            "stream_mode": ["updates", "tasks", "events"],
        });
        self.open_stream(user_id, task_id, thread_id, body).await
    }

    async fn open_stream(
        &self,
        user_id: &str,
        task_id: &str,
        thread_id: &str,
        body: Value,
    ) -> Result<ReceiverStream<Result<RawChunk>>> {
        let url = format!("{}/threads/{}/runs/stream", self.base_url, thread_id);
        debug!(user_id = %user_id, task_id = %task_id, thread_id = %thread_id, "Opening agent run stream");

        let response = self.http.post(&url).json(&body).send().await?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let task_id = task_id.to_string();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseFrameParser::new();

            while let Some(next) = bytes.next().await {
                match next {
                    Ok(block) => {
                        for chunk in parser.feed(&block) {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "Agent stream transport error");
                        let _ = tx.send(Err(GatewayError::from(e))).await;
                        return;
                    }
                }
            }

            // Tolerate streams that end without a trailing blank line
            if let Some(chunk) = parser.finish() {
                let _ = tx.send(Ok(chunk)).await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::UpstreamHttp {
        status: status.as_u16(),
        body,
    })
}

// ============================================
// SSE FRAME PARSER
// ============================================

/// Incremental parser for the `event:`/`data:` line protocol.
///
/// Buffers raw bytes so UTF-8 sequences and frames split across network
/// reads reassemble correctly; a frame is dispatched at each blank line.
struct SseFrameParser {
    buffer: Vec<u8>,
}

impl SseFrameParser {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds raw bytes, returning every frame completed by them.
    fn feed(&mut self, bytes: &[u8]) -> Vec<RawChunk> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end.frame_len).collect();
            self.buffer.drain(..end.separator_len);
            if let Some(chunk) = parse_frame(&String::from_utf8_lossy(&frame)) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Dispatches a final unterminated frame, if any.
    fn finish(&mut self) -> Option<RawChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        parse_frame(&frame)
    }
}

struct FrameEnd {
    frame_len: usize,
    separator_len: usize,
}

fn find_frame_end(buffer: &[u8]) -> Option<FrameEnd> {
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == b'\n' && buffer[i + 1] == b'\n' {
            return Some(FrameEnd {
                frame_len: i,
                separator_len: 2,
            });
        }
        if i + 3 < buffer.len() && &buffer[i..i + 4] == b"\r\n\r\n" {
            return Some(FrameEnd {
                frame_len: i,
                separator_len: 4,
            });
        }
        i += 1;
    }
    None
}

fn parse_frame(frame: &str) -> Option<RawChunk> {
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // id: and comment lines are ignored
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }

    let raw_data = data_lines.join("\n");
    let data = serde_json::from_str::<Value>(&raw_data).unwrap_or(Value::String(raw_data));

    Some(RawChunk {
        event: if event.is_empty() {
            "message".to_string()
        } else {
            event
        },
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_handles_frames_split_across_reads() {
        let mut parser = SseFrameParser::new();

        let first = parser.feed(b"event: metadata\ndata: {\"run_id\"");
        assert!(first.is_empty());

        let second = parser.feed(b": \"run-1\"}\n\nevent: updates\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event, "metadata");
        assert_eq!(second[0].data["run_id"], "run-1");

        let third = parser.feed(b"data: {\"node\": 1}\n\n");
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].event, "updates");
    }

    #[test]
    fn test_parser_handles_multibyte_content_split_mid_character() {
        let mut parser = SseFrameParser::new();
        let frame = "event: events\ndata: {\"text\": \"안녕?\"}\n\n".as_bytes();

        // Split inside the first Korean character
        let chunks_a = parser.feed(&frame[..20]);
        assert!(chunks_a.is_empty());
        let chunks_b = parser.feed(&frame[20..]);
        assert_eq!(chunks_b.len(), 1);
        assert_eq!(chunks_b[0].data["text"], "안녕?");
    }

    #[test]
    fn test_parser_joins_multiline_data() {
        let mut parser = SseFrameParser::new();
        let chunks = parser.feed(b"event: note\ndata: line one\ndata: line two\n\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, Value::String("line one\nline two".into()));
    }

    #[test]
    fn test_parser_flushes_unterminated_final_frame() {
        let mut parser = SseFrameParser::new();
        assert!(parser.feed(b"event: end\ndata: {\"ok\": true}").is_empty());
        let last = parser.finish().unwrap();
        assert_eq!(last.event, "end");
        assert_eq!(last.data["ok"], true);
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_parser_handles_crlf_frames() {
        let mut parser = SseFrameParser::new();
        let chunks = parser.feed(b"event: tasks\r\ndata: {\"id\": \"t\"}\r\n\r\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].event, "tasks");
        assert_eq!(chunks[0].data["id"], "t");
    }
}
