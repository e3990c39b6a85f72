//! File translation records and presets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Translation preset: memory, role, rules, model and agent selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePreset {
    pub file_preset_id: Uuid,
    pub principal_id: Uuid,
    pub description: String,
    pub llm_model_id: String,
    pub llm_model_temperature: i32,
    pub ai_agent_id: String,
    pub translation_memory: Option<String>,
    pub translation_role: Option<String>,
    pub translation_rule: Option<String>,
    pub target_language: String,
    pub target_country: String,
    pub target_city: Option<String>,
    pub task_type: String,
    pub audience: String,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Agent bookkeeping persisted alongside a translation row so clients and
/// operators can locate the run and its stream channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAgentData {
    pub agent_id: String,
    pub thread_id: String,
    pub last_run_id: Option<String>,
    pub rsmq_channel_id: String,
}

/// A file translation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub translation_id: Uuid,
    pub file_id: Uuid,
    pub file_preset_id: Uuid,
    /// Snapshot of the preset at creation time
    pub file_preset_json: Value,
    pub assignee_id: Uuid,
    /// Collector output: `{segments: [...], metadata?: {...}}`
    pub translated_text: Option<Value>,
    pub ai_agent_data: Option<AiAgentData>,
    pub status: crate::models::MessageStatus,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for starting a file translation
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TranslationCreate {
    #[validate(length(min = 4, max = 255))]
    pub user_id: String,
    pub principal_id: Uuid,
    pub file_id: Uuid,
    pub file_preset_id: Uuid,
    pub assignee_id: Uuid,
}

/// Response body for starting a file translation.
///
/// Clients subscribe to `/mq/channels/<rsmq_channel_id>/events` to follow
/// the translation stream.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationCreateResponse {
    pub translation_id: Uuid,
    pub rsmq_channel_id: String,
}
