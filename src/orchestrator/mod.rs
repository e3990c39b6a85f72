//! Task orchestration
//!
//! One orchestrator run drives one agent invocation to completion (or to
//! a human-in-the-loop suspension): it opens the agent stream, republishes
//! chunks to the run's channel, feeds the collector, applies the HITL
//! state machine and persists terminal state. Runs are spawned detached
//! from the HTTP request that created them; an SSE disconnect never
//! cancels a run.
//!
//! Once the run id is known, every published event is also mirrored into
//! the run's chunk buffer (`rsbuf:<run_id>`), which is closed with a
//! `done` record on clean completion; reconnecting clients replay it via
//! `GET /api/v1/chatbot/stream/{run_id}`.
//!
//! Broadcasts and buffer appends are best-effort. The database is the
//! system of record, so a failed publish is logged and the run continues.

mod translation;

pub use translation::PreparedTranslation;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{parse_chunk, AgentClient, AssistantId, ParsedChunk, RawChunk};
use crate::collector::{collector_for, ChunkCollector, AGENT_CHATBOT};
use crate::error::{GatewayError, Result};
use crate::fetch::AttachmentFetcher;
use crate::models::{
    AiAgentData, Message, MessageContent, MessageContentType, MessageCreate, MessageFile,
    MessageStatus, Task, TaskStatus,
};
use crate::mq::{RunBuffer, Rsmq};
use crate::store::Store;

#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    agent: Arc<AgentClient>,
    rsmq: Rsmq,
    buffer: RunBuffer,
    fetcher: Arc<AttachmentFetcher>,
}

/// A validated chatbot run, ready to be driven in the background.
pub struct PreparedRun {
    pub task: Task,
    pub message: Message,
    pub assistant_id: AssistantId,
    pub hitl_mode: bool,
    pub prompt: String,
    pub files: Vec<MessageFile>,
}

/// What a run target persists per chunk and how interrupts are labelled.
enum RunTarget<'a> {
    Chatbot {
        task_id: Uuid,
        message_id: Uuid,
    },
    Translation {
        translation_id: Uuid,
        agent_data: &'a mut AiAgentData,
    },
}

impl RunTarget<'_> {
    fn interrupt_record_id(&self) -> String {
        match self {
            RunTarget::Chatbot { message_id, .. } => message_id.to_string(),
            RunTarget::Translation { translation_id, .. } => translation_id.to_string(),
        }
    }
}

/// Result of consuming one agent stream to its end.
struct StreamOutcome {
    interrupted: bool,
    last_run_id: Option<String>,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        agent: Arc<AgentClient>,
        rsmq: Rsmq,
        buffer: RunBuffer,
        fetcher: Arc<AttachmentFetcher>,
    ) -> Self {
        Self {
            store,
            agent,
            rsmq,
            buffer,
            fetcher,
        }
    }

    // -------------------- chatbot entry --------------------

    /// Validates the state machine's entry rules and moves the task into
    /// `IN_PROGRESS` with its message in `PROCESSING`.
    ///
    /// Rejections surface to the HTTP caller before anything is spawned:
    /// a task already `IN_PROGRESS` conflicts, as does any status outside
    /// the allowed set; a HITL resume requires its message to be in `HITL`.
    pub async fn prepare_message_run(&self, data: &MessageCreate) -> Result<PreparedRun> {
        let task = self.store.get_task(data.task_id).await?;

        if task.status == TaskStatus::InProgress {
            return Err(GatewayError::Conflict(
                "Chat task is already running an action".to_string(),
            ));
        }
        if !task.status.can_start_run() {
            return Err(GatewayError::Conflict(
                "Chat task is not in a valid state".to_string(),
            ));
        }

        let mut message = if data.hitl_mode {
            let message_id = data.hitl_message_id.ok_or_else(|| {
                GatewayError::Validation("hitl_message_id is required in HITL mode".to_string())
            })?;
            let message = self.store.get_message(message_id).await?;
            if message.status != MessageStatus::Hitl {
                return Err(GatewayError::Conflict(
                    "Chat message is not in HITL status".to_string(),
                ));
            }
            self.store
                .set_message_status(message.message_id, MessageStatus::Processing, None)
                .await?;
            message
        } else {
            self.store
                .create_message(&data.user_id, task.task_id, MessageStatus::Processing)
                .await?
        };
        message.status = MessageStatus::Processing;

        self.store
            .set_task_status(task.task_id, TaskStatus::InProgress)
            .await?;

        Ok(PreparedRun {
            task,
            message,
            assistant_id: AssistantId::TaskTranslation,
            hitl_mode: data.hitl_mode,
            prompt: data.content.clone(),
            files: data.files.clone(),
        })
    }

    /// Drives a prepared chatbot run to its terminal state. Intended to be
    /// spawned; all failures are persisted, never returned.
    pub async fn run_message(&self, run: PreparedRun) {
        let task_id = run.task.task_id;
        let message_id = run.message.message_id;
        // The message ID doubles as the stream channel ID
        let channel_id = message_id.to_string();

        match self.drive_message_run(&run, &channel_id).await {
            Ok((outcome, ai_content)) => {
                if let Err(e) = self
                    .resolve_message_terminal(task_id, message_id, &channel_id, &outcome, &ai_content)
                    .await
                {
                    error!(task_id = %task_id, message_id = %message_id, error = %e,
                        "Failed to persist terminal state");
                }
            }
            Err(e) => {
                error!(task_id = %task_id, message_id = %message_id, error = %e,
                    "Chat message run failed");
                let stored = e.stored_message();
                if let Err(persist_err) = self
                    .store
                    .set_terminal_status(
                        task_id,
                        TaskStatus::Failed,
                        message_id,
                        MessageStatus::Failed,
                        Some(&stored),
                    )
                    .await
                {
                    error!(task_id = %task_id, error = %persist_err,
                        "Failed to persist FAILED state");
                }
            }
        }
    }

    async fn drive_message_run(
        &self,
        run: &PreparedRun,
        channel_id: &str,
    ) -> Result<(StreamOutcome, String)> {
        let user_id = &run.task.user_id;
        let task_id_str = run.task.task_id.to_string();

        // Thread selection: the task assistant stays on the task's thread;
        // a HITL resume stays on the message's thread; otherwise mint one
        // and persist it on the message before streaming begins.
        let thread_id = if run.assistant_id == AssistantId::TaskAssistant {
            run.task.thread_id.clone()
        } else if run.hitl_mode {
            run.message.thread_id.clone().ok_or_else(|| {
                GatewayError::Validation("Chat message has no thread to resume".to_string())
            })?
        } else {
            let thread_id = self.agent.create_thread().await?;
            self.store
                .update_message_thread(run.message.message_id, &thread_id)
                .await?;
            thread_id
        };

        let prompt = build_prompt(&self.fetcher, &run.prompt, &run.files).await;
        let mut collector = collector_for(AGENT_CHATBOT)?;

        let stream = if run.hitl_mode {
            self.agent
                .run_hitl_task(user_id, &task_id_str, &thread_id, run.assistant_id, &prompt)
                .await?
        } else {
            self.agent
                .run_new_task(user_id, &task_id_str, &thread_id, run.assistant_id, &prompt)
                .await?
        };

        let mut target = RunTarget::Chatbot {
            task_id: run.task.task_id,
            message_id: run.message.message_id,
        };
        let outcome = self
            .consume_stream(stream, channel_id, &mut target, collector.as_mut())
            .await?;

        Ok((outcome, collector.get_ai_content().to_string()))
    }

    async fn resolve_message_terminal(
        &self,
        task_id: Uuid,
        message_id: Uuid,
        channel_id: &str,
        outcome: &StreamOutcome,
        ai_content: &str,
    ) -> Result<()> {
        if outcome.interrupted {
            // Await human input; subscribers got the HITL frame, no `done`.
            self.store
                .set_terminal_status(
                    task_id,
                    TaskStatus::Hitl,
                    message_id,
                    MessageStatus::Hitl,
                    None,
                )
                .await?;
            info!(task_id = %task_id, message_id = %message_id, "Run suspended for human input");
            return Ok(());
        }

        // An operator may have cancelled the task out-of-band while the
        // stream was running; never overwrite that with COMPLETED.
        let latest = self.store.get_task(task_id).await?;
        let cancelled = latest.status == TaskStatus::Cancelled;
        let (task_status, message_status) = if cancelled {
            (TaskStatus::Cancelled, MessageStatus::Cancelled)
        } else {
            (TaskStatus::Completed, MessageStatus::Completed)
        };

        if !cancelled && !ai_content.is_empty() {
            let content = MessageContent {
                seqno: 1,
                run_id: outcome.last_run_id.clone().unwrap_or_default(),
                content_type: MessageContentType::Ai,
                content: Some(ai_content.to_string()),
                files: Vec::new(),
            };
            self.store
                .append_message_content(message_id, &content)
                .await?;
        }

        self.store
            .set_terminal_status(task_id, task_status, message_id, message_status, None)
            .await?;

        if !cancelled {
            // `done` tells SSE subscribers they may close
            if let Err(e) = self.rsmq.send(channel_id, &json!({ "type": "done" })).await {
                warn!(channel = %channel_id, error = %e, "Failed to send done marker");
            }
            self.finish_run_buffer(outcome.last_run_id.as_deref()).await;
        }

        info!(task_id = %task_id, message_id = %message_id,
            status = message_status.as_str(), "Run finished");
        Ok(())
    }

    // -------------------- shared chunk loop --------------------

    /// Consumes one agent stream: republishes chunks, feeds the collector,
    /// persists run ids and flags interrupts. The stream is always drained
    /// to its natural end, interrupt or not, so replay subscribers observe
    /// the full sequence.
    async fn consume_stream(
        &self,
        mut stream: ReceiverStream<Result<RawChunk>>,
        channel_id: &str,
        target: &mut RunTarget<'_>,
        collector: &mut dyn ChunkCollector,
    ) -> Result<StreamOutcome> {
        let mut interrupted = false;
        let mut last_run_id: Option<String> = None;
        let mut last_message_type = "unknown";

        while let Some(next) = stream.next().await {
            let raw = next?;
            let Some(parsed) = parse_chunk(&raw) else {
                continue;
            };

            collector.add_chunk(&raw.data);

            match &parsed {
                ParsedChunk::Metadata { run_id } => {
                    self.persist_run_id(target, run_id).await?;
                    last_run_id = Some(run_id.clone());
                    self.publish_chunk(channel_id, last_run_id.as_deref(), &parsed, &raw)
                        .await;
                }

                ParsedChunk::Tasks { .. } | ParsedChunk::Updates { .. } => {
                    self.publish_chunk(channel_id, last_run_id.as_deref(), &parsed, &raw)
                        .await;
                }

                ParsedChunk::Values { .. } => {
                    // Snapshots are only inspected for interrupts below
                }

                ParsedChunk::Events {
                    event_name,
                    is_ai_message,
                    is_tool_call,
                    chunk_data,
                    ..
                } => match event_name.as_str() {
                    "on_chat_model_stream" => {
                        last_message_type = if *is_ai_message {
                            "ai"
                        } else if *is_tool_call {
                            "tool"
                        } else {
                            "unknown"
                        };

                        if *is_ai_message {
                            if let Some(text) = chunk_data {
                                collector.append_ai_content(text);
                            }
                        }

                        self.publish(
                            channel_id,
                            last_run_id.as_deref(),
                            "model_stream_chunk",
                            json!({
                                "type": last_message_type,
                                "message": chunk_data.clone().unwrap_or_default(),
                                "status": MessageStatus::Processing.as_str(),
                            }),
                        )
                        .await;
                    }
                    "on_chat_model_end" => {
                        self.publish(
                            channel_id,
                            last_run_id.as_deref(),
                            "model_stream_chunk",
                            json!({
                                "type": last_message_type,
                                "message": "",
                                "status": MessageStatus::Completed.as_str(),
                            }),
                        )
                        .await;
                    }
                    _ => {}
                },
            }

            if parsed.is_interrupted() {
                let interrupt_msg = parsed.interrupt_msg().unwrap_or_default();
                self.publish(
                    channel_id,
                    last_run_id.as_deref(),
                    "ai_message",
                    json!({
                        "type": "ai",
                        "message": interrupt_msg,
                        "status": MessageStatus::Hitl.as_str(),
                        "message_id": target.interrupt_record_id(),
                    }),
                )
                .await;
                // Keep consuming: the agent may still flush trailing chunks
                interrupted = true;
            }
        }

        Ok(StreamOutcome {
            interrupted,
            last_run_id,
        })
    }

    async fn persist_run_id(&self, target: &mut RunTarget<'_>, run_id: &str) -> Result<()> {
        match target {
            RunTarget::Chatbot { task_id, .. } => {
                self.store.update_task_run_id(*task_id, run_id).await
            }
            RunTarget::Translation {
                translation_id,
                agent_data,
            } => {
                agent_data.last_run_id = Some(run_id.to_string());
                self.store
                    .update_translation_agent_data(*translation_id, agent_data)
                    .await
            }
        }
    }

    async fn publish_chunk(
        &self,
        channel_id: &str,
        run_id: Option<&str>,
        parsed: &ParsedChunk,
        raw: &RawChunk,
    ) {
        self.publish(
            channel_id,
            run_id,
            "langgraph_stream_chunk",
            json!({ "type": parsed.variant_tag(), "data": raw.data }),
        )
        .await;
    }

    /// Publishes one event to the channel, mirroring it into the run's
    /// chunk buffer once the run id is known. Both writes are best-effort.
    async fn publish(
        &self,
        channel_id: &str,
        run_id: Option<&str>,
        event_type: &str,
        payload: Value,
    ) {
        if let Some(run_id) = run_id {
            let entry = json!({ "type": event_type, "payload": &payload });
            if let Err(e) = self.buffer.append(run_id, &entry).await {
                warn!(run_id = %run_id, event = event_type, error = %e,
                    "Run buffer append failed, run continues");
            }
        }

        if let Err(e) = self.rsmq.broadcast(channel_id, event_type, payload).await {
            warn!(channel = %channel_id, event = event_type, error = %e,
                "Broadcast failed, run continues");
        }
    }

    /// Marks the run's chunk buffer complete so buffer followers close.
    async fn finish_run_buffer(&self, run_id: Option<&str>) {
        let Some(run_id) = run_id else {
            return;
        };
        if let Err(e) = self.buffer.finish(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to finish run buffer");
        }
    }
}

/// Concatenates `.txt` attachments into the prompt.
///
/// Each fetched text is appended after a blank line; non-text files are
/// skipped, and a failed fetch skips the file without failing the run.
pub async fn build_prompt(
    fetcher: &AttachmentFetcher,
    prompt: &str,
    files: &[MessageFile],
) -> String {
    let mut prompt = prompt.to_string();

    for file in files {
        if !file.extension.eq_ignore_ascii_case("txt") {
            continue;
        }
        match fetcher.read_text(&file.url).await {
            Ok(text) => {
                prompt.push_str("\n\n");
                prompt.push_str(&text);
            }
            Err(e) => {
                warn!(file = %file.name, url = %file.url, error = %e,
                    "Skipping attachment that failed to fetch");
            }
        }
    }

    prompt
}
