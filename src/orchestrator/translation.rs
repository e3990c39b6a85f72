//! File translation runs
//!
//! Same chunk loop as the chatbot path with two differences: the prompt
//! is the stored segments object JSON-encoded, and terminal success
//! writes the collector's artifact into the translation row together
//! with the agent bookkeeping.

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Orchestrator, RunTarget};
use crate::agent::AssistantId;
use crate::collector::collector_for;
use crate::error::{GatewayError, Result};
use crate::models::{AiAgentData, FilePreset, MessageStatus, TranslationCreate};

/// A validated translation run, ready to be driven in the background.
pub struct PreparedTranslation {
    pub translation_id: Uuid,
    /// Freshly minted channel the client subscribes to.
    pub rsmq_channel_id: String,
    pub user_id: String,
    pub preset: FilePreset,
    /// Stored `{"segments": [...]}` object for the source file.
    pub original: Value,
}

impl Orchestrator {
    /// Loads the preset and original text, validates the agent id and
    /// creates the translation row. Rejections surface to the HTTP caller
    /// before anything is spawned.
    pub async fn prepare_translation_run(
        &self,
        data: &TranslationCreate,
    ) -> Result<PreparedTranslation> {
        let preset = self
            .store
            .get_file_preset(data.principal_id, data.file_preset_id)
            .await?;

        // Unknown agent ids must fail the request, not the background run
        collector_for(&preset.ai_agent_id)?;

        let original = self.store.get_original_text(data.file_id).await?;
        let has_segments = original
            .get("segments")
            .and_then(Value::as_array)
            .map(|segments| !segments.is_empty())
            .unwrap_or(false);
        if !has_segments {
            return Err(GatewayError::Validation(
                "Original text has no segments".to_string(),
            ));
        }

        let translation_id = self.store.create_translation(data, &preset).await?;
        let rsmq_channel_id = Uuid::now_v7().to_string();

        Ok(PreparedTranslation {
            translation_id,
            rsmq_channel_id,
            user_id: data.user_id.clone(),
            preset,
            original,
        })
    }

    /// Drives a prepared translation run to its terminal state. Intended
    /// to be spawned; all failures are persisted, never returned.
    pub async fn run_translation(&self, run: PreparedTranslation) {
        let translation_id = run.translation_id;

        if let Err(e) = self.drive_translation_run(&run).await {
            error!(translation_id = %translation_id, error = %e, "Translation run failed");
            let stored = e.stored_message();
            if let Err(persist_err) = self
                .store
                .set_translation_status(translation_id, MessageStatus::Failed, Some(&stored))
                .await
            {
                error!(translation_id = %translation_id, error = %persist_err,
                    "Failed to persist FAILED state");
            }
        }
    }

    async fn drive_translation_run(&self, run: &PreparedTranslation) -> Result<()> {
        let translation_id = run.translation_id;
        let channel_id = &run.rsmq_channel_id;

        self.store
            .set_translation_status(translation_id, MessageStatus::Processing, None)
            .await?;

        let thread_id = self.agent.create_thread().await?;
        let mut agent_data = AiAgentData {
            agent_id: run.preset.ai_agent_id.clone(),
            thread_id: thread_id.clone(),
            last_run_id: None,
            rsmq_channel_id: channel_id.clone(),
        };
        self.store
            .update_translation_agent_data(translation_id, &agent_data)
            .await?;

        // The prompt is the stored segments object, compact-encoded
        let prompt = serde_json::to_string(&run.original)?;
        let mut collector = collector_for(&run.preset.ai_agent_id)?;

        let stream = self
            .agent
            .run_new_task(
                &run.user_id,
                &translation_id.to_string(),
                &thread_id,
                AssistantId::TaskTranslation,
                &prompt,
            )
            .await?;

        let outcome = {
            let mut target = RunTarget::Translation {
                translation_id,
                agent_data: &mut agent_data,
            };
            self.consume_stream(stream, channel_id, &mut target, collector.as_mut())
                .await?
        };

        if outcome.interrupted {
            self.store
                .set_translation_status(translation_id, MessageStatus::Hitl, None)
                .await?;
            info!(translation_id = %translation_id, "Translation suspended for human input");
            return Ok(());
        }

        // Never overwrite an out-of-band cancellation with COMPLETED
        let cancelled =
            self.store.get_translation_status(translation_id).await? == MessageStatus::Cancelled;
        if cancelled {
            info!(translation_id = %translation_id, "Translation cancelled during run");
            return Ok(());
        }

        let artifact = collector.format_result();
        self.store
            .finalize_translation(
                translation_id,
                Some(&artifact),
                &agent_data,
                MessageStatus::Completed,
                None,
            )
            .await?;

        if let Err(e) = self
            .rsmq
            .send(channel_id, &serde_json::json!({ "type": "done" }))
            .await
        {
            warn!(channel = %channel_id, error = %e, "Failed to send done marker");
        }
        self.finish_run_buffer(outcome.last_run_id.as_deref()).await;

        info!(translation_id = %translation_id, "Translation finished");
        Ok(())
    }
}
