//! Core traits for the conversation engine's external collaborators.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ComprehensionSignal, FactUpsert, MemoryEntry, Realm, UpsertAck};

/// Request/response interface to the external long-term memory store.
///
/// The store's persistence engine is out of scope; this engine only
/// queries, ranks, and merges what the store returns. Writes are limited
/// to the `Actor` realm by the consolidation pipeline.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    type Error;

    async fn search(
        &self,
        realm: Realm,
        entity_id: &str,
        query: &str,
        max_results: usize,
        max_depth: u8,
    ) -> Result<Vec<MemoryEntry>, Self::Error>;

    async fn upsert(
        &self,
        realm: Realm,
        entity_id: &str,
        facts: Vec<FactUpsert>,
    ) -> Result<UpsertAck, Self::Error>;
}

/// Prepared input for one response-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// Mode framing: level guidance in tutor mode, policy overrides in
    /// agent mode.
    pub instructions: String,
    /// Formatted resolved-memory context.
    pub memory_context: String,
    /// Recent conversation history, oldest first.
    pub history: Vec<ChatMessage>,
    pub user_message: String,
}

/// Complete (non-streamed) generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
}

/// The language-model collaborator.
///
/// `generate` and `generate_stream` must produce identical text for
/// identical input; the streaming pipeline relies on that to fall back to
/// a single complete response on stream failure.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    type Error;

    async fn generate(&self, ctx: &PromptContext) -> Result<GenerationOutput, Self::Error>;

    async fn generate_stream(
        &self,
        ctx: &PromptContext,
    ) -> Result<BoxStream<'static, Result<String, Self::Error>>, Self::Error>;

    /// Best-effort comprehension/confusion read on a user reply, used
    /// only for tutor-mode level adjustment. The engine consumes the
    /// signal as-is and performs no inference of its own.
    fn assess_comprehension(&self, user_message: &str) -> ComprehensionSignal;
}

/// A chunk as delivered by the streaming pipeline, in generation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub index: usize,
    pub content: String,
}
