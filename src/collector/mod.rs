//! Chunk collectors
//!
//! A collector accumulates one run's streamed output and produces the
//! final artifact at terminal state. Implementations are selected by AI
//! agent id through `collector_for`; the translation formatting logic is
//! a concrete implementation, not a base class.

mod translation;

pub use translation::TranslationCollector;

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::error::{GatewayError, Result};

pub const AGENT_CHATBOT: &str = "agent_chatbot";
pub const AGENT_TRANSLATION_A1: &str = "agent_translation_a1";
pub const AGENT_TRANSLATION_A2: &str = "agent_translation_a2";

/// Accumulates parsed chunks into a final artifact.
pub trait ChunkCollector: Send {
    /// Stores one raw chunk.
    fn add_chunk(&mut self, chunk: &Value);

    /// All raw chunks stored so far, in arrival order.
    fn chunks(&self) -> &[Value];

    /// Appends streamed AI text.
    fn append_ai_content(&mut self, text: &str);

    fn set_metadata(&mut self, key: &str, value: Value);

    fn get_metadata(&self, key: &str) -> Option<&Value>;

    fn get_ai_content(&self) -> &str;

    /// Produces the final artifact.
    fn format_result(&self) -> Value;
}

/// Returns the collector for an AI agent id.
pub fn collector_for(agent_id: &str) -> Result<Box<dyn ChunkCollector>> {
    match agent_id {
        AGENT_CHATBOT => Ok(Box::new(ChatbotCollector::new())),
        AGENT_TRANSLATION_A1 | AGENT_TRANSLATION_A2 => Ok(Box::new(TranslationCollector::new())),
        other => Err(GatewayError::Validation(format!(
            "Unsupported AI agent id: {other}"
        ))),
    }
}

// ============================================
// SHARED ACCUMULATION STATE
// ============================================

/// Chunk/text/metadata accumulation shared by collectors via composition.
#[derive(Debug, Default)]
pub(crate) struct CollectorState {
    chunks: Vec<Value>,
    ai_content: String,
    metadata: HashMap<String, Value>,
}

impl CollectorState {
    pub(crate) fn add_chunk(&mut self, chunk: &Value) {
        self.chunks.push(chunk.clone());
    }

    pub(crate) fn chunks(&self) -> &[Value] {
        &self.chunks
    }

    pub(crate) fn append_ai_content(&mut self, text: &str) {
        self.ai_content.push_str(text);
    }

    pub(crate) fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub(crate) fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub(crate) fn ai_content(&self) -> &str {
        &self.ai_content
    }
}

// ============================================
// CHATBOT COLLECTOR
// ============================================

/// Collector for conversational agents: the artifact is the accumulated
/// AI text as-is.
#[derive(Debug, Default)]
pub struct ChatbotCollector {
    state: CollectorState,
}

impl ChatbotCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkCollector for ChatbotCollector {
    fn add_chunk(&mut self, chunk: &Value) {
        self.state.add_chunk(chunk);
    }

    fn chunks(&self) -> &[Value] {
        self.state.chunks()
    }

    fn append_ai_content(&mut self, text: &str) {
        self.state.append_ai_content(text);
    }

    fn set_metadata(&mut self, key: &str, value: Value) {
        self.state.set_metadata(key, value);
    }

    fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.state.get_metadata(key)
    }

    fn get_ai_content(&self) -> &str {
        self.state.ai_content()
    }

    fn format_result(&self) -> Value {
        json!({ "content": self.state.ai_content() })
    }
}
