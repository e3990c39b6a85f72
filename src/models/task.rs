//! Chat task records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::GatewayError;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is ready to be started.
    Ready,
    /// Task is running an agent action.
    InProgress,
    /// Task is waiting for human input (human-in-the-loop).
    Hitl,
    /// Task completed successfully.
    Completed,
    /// Task failed due to an error.
    Failed,
    /// Task was cancelled by the user.
    Cancelled,
    /// Task was abandoned by the system.
    Abandoned,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Hitl => "hitl",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Abandoned => "abandoned",
        }
    }

    /// States from which a new agent run may be started.
    pub fn can_start_run(&self) -> bool {
        matches!(
            self,
            TaskStatus::Ready
                | TaskStatus::Hitl
                | TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Abandoned
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "hitl" => Ok(Self::Hitl),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(GatewayError::Internal(format!(
                "Unknown task status: {other}"
            ))),
        }
    }
}

/// A chat task: one agent conversation owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub translation_memory: Option<String>,
    pub translation_role: Option<String>,
    /// Agent thread bound to this task for its whole lifetime.
    pub thread_id: String,
    pub status: TaskStatus,
    /// Last agent run observed for this task.
    pub last_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// Request body for creating a chat task
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TaskCreate {
    #[validate(length(min = 4, max = 255))]
    pub user_id: String,
    #[validate(length(max = 255))]
    #[serde(default = "default_task_title")]
    pub title: String,
    #[validate(length(max = 4096))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    #[serde(default = "default_translation_memory")]
    pub translation_memory: Option<String>,
    #[validate(length(max = 10_000))]
    pub translation_role: Option<String>,
}

fn default_task_title() -> String {
    "New task".to_string()
}

fn default_translation_memory() -> Option<String> {
    Some("default-translation-memory".to_string())
}

/// Response body for creating a chat task
#[derive(Debug, Clone, Serialize)]
pub struct TaskCreateResponse {
    pub task_id: Uuid,
    pub thread_id: String,
}
