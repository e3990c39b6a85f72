//! Chat message records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::GatewayError;

/// Message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Message is waiting to be processed.
    Pending,
    /// Message is being processed by an agent run.
    Processing,
    /// Message is waiting for human input (human-in-the-loop).
    Hitl,
    /// Message was completed successfully.
    Completed,
    /// Message failed due to an error.
    Failed,
    /// Message was cancelled by the user.
    Cancelled,
    /// Message was abandoned by the system.
    Abandoned,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Hitl => "hitl",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
            MessageStatus::Cancelled => "cancelled",
            MessageStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "hitl" => Ok(Self::Hitl),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(GatewayError::Internal(format!(
                "Unknown message status: {other}"
            ))),
        }
    }
}

/// Author of one message content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContentType {
    Ai,
    Human,
    Tool,
}

/// File attached to a message
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MessageFile {
    #[validate(length(max = 1024))]
    pub url: String,
    #[validate(length(max = 512))]
    pub name: String,
    #[validate(length(max = 128))]
    pub mime_type: String,
    #[validate(length(max = 16))]
    pub extension: String,
    /// Bytes; capped at 2GB
    #[validate(range(min = 1, max = 2_147_483_648u64))]
    pub size: u64,
}

/// One ordered content item inside a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    pub seqno: u32,
    /// Agent run that produced this item
    pub run_id: String,
    #[serde(rename = "type")]
    pub content_type: MessageContentType,
    pub content: Option<String>,
    #[serde(default)]
    pub files: Vec<MessageFile>,
}

/// A chat message: one exchange within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    /// Agent thread this message streams on; set before streaming begins.
    pub thread_id: Option<String>,
    pub contents: Vec<MessageContent>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// Request body for creating (or HITL-resuming) a chat message
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MessageCreate {
    /// Resume an existing HITL message instead of creating a new one
    #[serde(default)]
    pub hitl_mode: bool,
    /// Message to resume when `hitl_mode` is set
    pub hitl_message_id: Option<Uuid>,

    #[validate(length(min = 4, max = 255))]
    pub user_id: String,
    pub task_id: Uuid,
    #[validate(length(min = 1))]
    pub content: String,
    #[serde(default)]
    #[validate(length(max = 64), nested)]
    pub files: Vec<MessageFile>,
}

/// Response body for creating a chat message.
///
/// The message ID doubles as the channel ID for SSE subscriptions:
/// clients follow `/mq/channels/<message_id>/events`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageCreateResponse {
    pub message_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Processing,
            MessageStatus::Hitl,
            MessageStatus::Completed,
            MessageStatus::Failed,
            MessageStatus::Cancelled,
            MessageStatus::Abandoned,
        ] {
            assert_eq!(MessageStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(MessageStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_content_serializes_with_type_tag() {
        let content = MessageContent {
            seqno: 1,
            run_id: "run-1".to_string(),
            content_type: MessageContentType::Ai,
            content: Some("hello".to_string()),
            files: Vec::new(),
        };
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["type"], "ai");
        assert_eq!(value["seqno"], 1);
    }
}
