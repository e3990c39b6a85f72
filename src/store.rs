//! Task / message / translation state store
//!
//! Thin persistence layer over Postgres. The orchestrator treats these
//! records as its system of record: broadcasts are best-effort, the rows
//! written here are authoritative. Terminal status writes for a
//! `(task, message)` pair happen in one transaction.

use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::models::{
    AiAgentData, FilePreset, Message, MessageStatus, Task, TaskCreate, TaskStatus,
    TranslationCreate,
};

#[derive(Clone)]
pub struct Store {
    db: PgPool,
}

impl Store {
    /// Connects to the database
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to database...");
        let db = PgPool::connect(database_url).await?;
        info!("Store initialized");
        Ok(Self { db })
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    // -------------------- tasks --------------------

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let row = sqlx::query(
            r#"
            SELECT task_id, user_id, title, description, translation_memory, translation_role,
                   thread_id, status, last_run_id, created_at, updated_at, is_deleted
            FROM chat_tasks
            WHERE task_id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound("Chat task not found".to_string()))?;

        map_task(&row)
    }

    pub async fn create_task(&self, data: &TaskCreate, thread_id: &str) -> Result<Task> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_tasks
                (task_id, user_id, title, description, translation_memory, translation_role,
                 thread_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING task_id, user_id, title, description, translation_memory, translation_role,
                      thread_id, status, last_run_id, created_at, updated_at, is_deleted
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&data.user_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(&data.translation_memory)
        .bind(&data.translation_role)
        .bind(thread_id)
        .bind(TaskStatus::Ready.as_str())
        .fetch_one(&self.db)
        .await?;

        map_task(&row)
    }

    /// Persists the run id observed from the agent's metadata chunk.
    ///
    /// One UPDATE so `(last_run_id, updated_at)` move together.
    pub async fn update_task_run_id(&self, task_id: Uuid, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chat_tasks SET last_run_id = $2, updated_at = NOW() WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(run_id)
        .execute(&self.db)
        .await?;

        debug!(task_id = %task_id, run_id = %run_id, "Updated task run id");
        Ok(())
    }

    pub async fn set_task_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE chat_tasks SET status = $2, updated_at = NOW() WHERE task_id = $1")
            .bind(task_id)
            .bind(status.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    // -------------------- messages --------------------

    pub async fn get_message(&self, message_id: Uuid) -> Result<Message> {
        let row = sqlx::query(
            r#"
            SELECT message_id, task_id, user_id, thread_id, contents, status,
                   created_at, updated_at, is_deleted
            FROM chat_messages
            WHERE message_id = $1 AND is_deleted = FALSE
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound("Chat message not found".to_string()))?;

        map_message(&row)
    }

    pub async fn create_message(
        &self,
        user_id: &str,
        task_id: Uuid,
        status: MessageStatus,
    ) -> Result<Message> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_messages
                (message_id, task_id, user_id, contents, status, created_at, updated_at)
            VALUES ($1, $2, $3, '[]'::jsonb, $4, NOW(), NOW())
            RETURNING message_id, task_id, user_id, thread_id, contents, status,
                      created_at, updated_at, is_deleted
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(task_id)
        .bind(user_id)
        .bind(status.as_str())
        .fetch_one(&self.db)
        .await?;

        map_message(&row)
    }

    /// Binds the agent thread to a message before streaming begins.
    pub async fn update_message_thread(&self, message_id: Uuid, thread_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chat_messages SET thread_id = $2, updated_at = NOW() WHERE message_id = $1",
        )
        .bind(message_id)
        .bind(thread_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn set_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chat_messages
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(status.as_str())
        .bind(status_message)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Appends one content item to a message's `contents` list.
    pub async fn append_message_content(
        &self,
        message_id: Uuid,
        content: &crate::models::MessageContent,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chat_messages
            SET contents = contents || $2::jsonb, updated_at = NOW()
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(serde_json::to_value(content)?)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Writes a run's terminal state onto its task and message together.
    pub async fn set_terminal_status(
        &self,
        task_id: Uuid,
        task_status: TaskStatus,
        message_id: Uuid,
        message_status: MessageStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE chat_messages
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(message_status.as_str())
        .bind(status_message)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_tasks SET status = $2, updated_at = NOW() WHERE task_id = $1")
            .bind(task_id)
            .bind(task_status.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            task_id = %task_id,
            task_status = task_status.as_str(),
            message_id = %message_id,
            message_status = message_status.as_str(),
            "Wrote terminal status"
        );
        Ok(())
    }

    // -------------------- presets / originals --------------------

    pub async fn get_file_preset(
        &self,
        principal_id: Uuid,
        file_preset_id: Uuid,
    ) -> Result<FilePreset> {
        let row = sqlx::query(
            r#"
            SELECT file_preset_id, principal_id, description, llm_model_id,
                   llm_model_temperature, ai_agent_id, translation_memory, translation_role,
                   translation_rule, target_language, target_country, target_city,
                   task_type, audience, purpose, created_at, updated_at
            FROM file_presets
            WHERE file_preset_id = $1 AND principal_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(file_preset_id)
        .bind(principal_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound("File preset not found".to_string()))?;

        map_preset(&row)
    }

    /// Stored segments object for a source file: `{"segments": [...]}`.
    pub async fn get_original_text(&self, file_id: Uuid) -> Result<Value> {
        let row = sqlx::query(
            "SELECT original_text FROM file_originals WHERE file_id = $1 AND deleted_at IS NULL",
        )
        .bind(file_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound("Original text not found".to_string()))?;

        let original_text: Value = row.try_get("original_text")?;
        Ok(original_text)
    }

    // -------------------- translations --------------------

    pub async fn create_translation(
        &self,
        data: &TranslationCreate,
        preset: &FilePreset,
    ) -> Result<Uuid> {
        let preset_json = serde_json::to_value(preset)?;
        let row = sqlx::query(
            r#"
            INSERT INTO file_translations
                (translation_id, file_id, file_preset_id, file_preset_json, assignee_id,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING translation_id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(data.file_id)
        .bind(data.file_preset_id)
        .bind(&preset_json)
        .bind(data.assignee_id)
        .bind(MessageStatus::Pending.as_str())
        .fetch_one(&self.db)
        .await?;

        Ok(row.try_get("translation_id")?)
    }

    /// Persists the agent bookkeeping (`agent_id`, `thread_id`,
    /// `last_run_id`, `rsmq_channel_id`) for a translation run.
    pub async fn update_translation_agent_data(
        &self,
        translation_id: Uuid,
        agent_data: &AiAgentData,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE file_translations
            SET ai_agent_data = $2, updated_at = NOW()
            WHERE translation_id = $1
            "#,
        )
        .bind(translation_id)
        .bind(serde_json::to_value(agent_data)?)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get_translation_status(&self, translation_id: Uuid) -> Result<MessageStatus> {
        let row = sqlx::query(
            "SELECT status FROM file_translations WHERE translation_id = $1",
        )
        .bind(translation_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| GatewayError::NotFound("File translation not found".to_string()))?;

        let status: String = row.try_get("status")?;
        status.parse()
    }

    pub async fn set_translation_status(
        &self,
        translation_id: Uuid,
        status: MessageStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE file_translations
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE translation_id = $1
            "#,
        )
        .bind(translation_id)
        .bind(status.as_str())
        .bind(status_message)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Writes a translation run's terminal state: artifact, agent data and
    /// status land in one transaction.
    pub async fn finalize_translation(
        &self,
        translation_id: Uuid,
        translated_text: Option<&Value>,
        agent_data: &AiAgentData,
        status: MessageStatus,
        status_message: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE file_translations
            SET translated_text = $2, ai_agent_data = $3, status = $4, status_message = $5,
                updated_at = NOW()
            WHERE translation_id = $1
            "#,
        )
        .bind(translation_id)
        .bind(translated_text.cloned())
        .bind(serde_json::to_value(agent_data)?)
        .bind(status.as_str())
        .bind(status_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            translation_id = %translation_id,
            status = status.as_str(),
            "Finalized translation"
        );
        Ok(())
    }
}

// -------------------- row mapping --------------------

fn map_task(row: &PgRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    Ok(Task {
        task_id: row.try_get("task_id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        translation_memory: row.try_get("translation_memory")?,
        translation_role: row.try_get("translation_role")?,
        thread_id: row.try_get("thread_id")?,
        status: status.parse()?,
        last_run_id: row.try_get("last_run_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
    })
}

fn map_message(row: &PgRow) -> Result<Message> {
    let status: String = row.try_get("status")?;
    let contents: Value = row.try_get("contents")?;
    Ok(Message {
        message_id: row.try_get("message_id")?,
        task_id: row.try_get("task_id")?,
        user_id: row.try_get("user_id")?,
        thread_id: row.try_get("thread_id")?,
        contents: serde_json::from_value(contents)?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
    })
}

fn map_preset(row: &PgRow) -> Result<FilePreset> {
    Ok(FilePreset {
        file_preset_id: row.try_get("file_preset_id")?,
        principal_id: row.try_get("principal_id")?,
        description: row.try_get("description")?,
        llm_model_id: row.try_get("llm_model_id")?,
        llm_model_temperature: row.try_get("llm_model_temperature")?,
        ai_agent_id: row.try_get("ai_agent_id")?,
        translation_memory: row.try_get("translation_memory")?,
        translation_role: row.try_get("translation_role")?,
        translation_rule: row.try_get("translation_rule")?,
        target_language: row.try_get("target_language")?,
        target_country: row.try_get("target_country")?,
        target_city: row.try_get("target_city")?,
        task_type: row.try_get("task_type")?,
        audience: row.try_get("audience")?,
        purpose: row.try_get("purpose")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
