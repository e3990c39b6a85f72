//! Error types for the Gateway Service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Agent service unavailable: {0}")]
    Unavailable(String),

    #[error("Agent service timeout: {0}")]
    Timeout(String),

    #[error("Agent service error: {status} - {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if e.is_connect() {
            GatewayError::Unavailable(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::UpstreamHttp {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }
}

impl GatewayError {
    /// Short kind label used in opaque stored error messages.
    pub fn kind_label(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::Conflict(_) => "Conflict",
            GatewayError::Validation(_) => "Validation",
            GatewayError::Unavailable(_) => "Unavailable",
            GatewayError::Timeout(_) => "Timeout",
            GatewayError::UpstreamHttp { .. } => "UpstreamHttp",
            GatewayError::Storage(_) => "Storage",
            GatewayError::Transport(_) => "Transport",
            GatewayError::JsonError(_) => "Json",
            GatewayError::ConfigError(_) => "Config",
            GatewayError::IoError(_) => "Io",
            GatewayError::Internal(_) => "Internal",
        }
    }

    /// Message persisted on a failed task/message record.
    ///
    /// Validation and missing-record failures keep the concrete reason;
    /// everything else is opaque so server internals never leak to clients.
    pub fn stored_message(&self) -> String {
        match self {
            GatewayError::Validation(msg)
            | GatewayError::NotFound(msg)
            | GatewayError::Conflict(msg) => msg.clone(),
            other => format!(
                "System error ({}). Check the server logs for details.",
                other.kind_label()
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
