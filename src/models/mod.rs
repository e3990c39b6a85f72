//! Domain records and API schemas
//!
//! Tasks own an agent thread for their lifetime; messages belong to
//! exactly one task and stream on a per-message (or per-task) thread.
//! Translations carry their own stream channel ID.

mod message;
mod task;
mod translation;

pub use message::{
    Message, MessageContent, MessageContentType, MessageCreate, MessageCreateResponse, MessageFile,
    MessageStatus,
};
pub use task::{Task, TaskCreate, TaskCreateResponse, TaskStatus};
pub use translation::{
    AiAgentData, FilePreset, TranslationCreate, TranslationCreateResponse, TranslationRecord,
};
