//! LLM Agent Runtime Client
//!
//! Drives runs on the external agent service and normalizes its
//! heterogeneous chunk stream. A run streams with modes
//! `["updates", "tasks", "events"]`:
//!
//! - "updates": delta output of each graph node (interrupts surface here)
//! - "tasks": node lifecycle (started / completed, errors, interrupts)
//! - "events": per-token lifecycle (`on_chat_model_start`,
//!   `on_chat_model_stream`, `on_chat_model_end`)
//!
//! Retries are an orchestrator concern; this layer fails fast with
//! categorized errors.

mod chunk;
mod client;

pub use chunk::{parse_chunk, ParsedChunk, RawChunk};
pub use client::AgentClient;

use crate::error::GatewayError;

/// Assistant ID on the agent runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantId {
    TaskAssistant,
    TaskTranslation,
}

impl AssistantId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantId::TaskAssistant => "task_assistant",
            AssistantId::TaskTranslation => "task_translation",
        }
    }
}

impl std::str::FromStr for AssistantId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_assistant" => Ok(Self::TaskAssistant),
            "task_translation" => Ok(Self::TaskTranslation),
            other => Err(GatewayError::Validation(format!(
                "Unsupported assistant id: {other}"
            ))),
        }
    }
}
