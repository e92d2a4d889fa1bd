//! Consolidation job records.

use cq_core::types::{ActorId, ChatMessage, ChatMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    /// Retry ceiling exhausted; logged with full context for manual
    /// replay.
    FailedPermanent,
}

/// One attempt to fold a message slice into durable memory. Owned
/// exclusively by the pipeline; not cancellable after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationJob {
    pub job_id: Uuid,
    pub session_id: Uuid,
    /// Upserts target this actor's realm; consolidation never writes
    /// anywhere else.
    pub actor_id: ActorId,
    pub mode: ChatMode,
    pub messages: Vec<ChatMessage>,
    pub submitted_at: i64,
    pub retry_count: u32,
    pub status: JobStatus,
}

impl ConsolidationJob {
    pub fn new(
        session_id: Uuid,
        actor_id: ActorId,
        mode: ChatMode,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            session_id,
            actor_id,
            mode,
            messages,
            submitted_at: chrono::Utc::now().timestamp(),
            retry_count: 0,
            status: JobStatus::Pending,
        }
    }
}
