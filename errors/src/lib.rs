//! # Colloquy Errors
//!
//! Shared error taxonomy for the conversation engine.
//!
//! Per-realm and per-chunk failures are absorbed where they occur and
//! degrade locally; the enums here cover the failures that cross a
//! component boundary and need an explicit kind the caller can map to
//! user-facing messaging.

use thiserror::Error;

/// Memory resolution errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Every included realm failed or timed out. The caller must degrade
    /// to a history-only response, never a hard failure.
    #[error("all {attempted} memory realms unavailable")]
    AllRealmsUnavailable { attempted: usize },

    #[error("memory realm {realm} timed out after {timeout_ms}ms")]
    RealmTimeout { realm: String, timeout_ms: u64 },

    #[error("memory provider error in realm {realm}: {reason}")]
    Provider { realm: String, reason: String },

    #[error("memory store returned an invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("memory store request failed with status {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("memory store unreachable: {reason}")]
    Connection { reason: String },
}

impl MemoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::RealmTimeout { .. }
                | MemoryError::Connection { .. }
                | MemoryError::Http { status: 500..=599, .. }
                | MemoryError::Http { status: 429, .. }
        )
    }
}

/// Context-store errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// Lock contention exhausted the bounded retry budget. Retryable by
    /// the caller.
    #[error("session {session_id} lock contended after {attempts} attempts")]
    Conflict { session_id: String, attempts: u32 },

    #[error("session backend error: {backend} - {reason}")]
    Backend { backend: String, reason: String },

    #[error("session record corrupted: {reason}")]
    Serialization { reason: String },
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Conflict { .. })
    }
}

/// Streaming pipeline errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The response generator stalled beyond its timeout; the stream is
    /// terminated with an error event rather than hanging the consumer.
    #[error("generation stalled beyond {timeout_ms}ms")]
    GenerationTimeout { timeout_ms: u64 },

    #[error("stream consumer disconnected after {chunks_delivered} chunks")]
    Disconnected { chunks_delivered: usize },

    #[error("generator error: {reason}")]
    Generator { reason: String },
}

/// Consolidation pipeline errors.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("transient consolidation failure: {reason}")]
    Transient { reason: String },

    /// Retry ceiling exhausted. Logged with full job context for manual
    /// replay; never silently dropped.
    #[error("consolidation job {job_id} failed permanently after {attempts} attempts: {reason}")]
    FailedPermanent {
        job_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("consolidation queue full, trigger dropped for session {session_id}")]
    QueueFull { session_id: String },

    #[error("consolidation pipeline shut down")]
    Shutdown,
}

impl ConsolidationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsolidationError::Transient { .. })
    }
}

/// Caller-facing error kind, stable across refactors of the inner enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatErrorKind {
    MemoryUnavailable,
    SessionConflict,
    SessionNotFound,
    GenerationTimeout,
    GenerationFailed,
    Internal,
}

/// Umbrella error surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("response generation failed: {reason}")]
    Generation { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            ChatError::Memory(MemoryError::AllRealmsUnavailable { .. }) => {
                ChatErrorKind::MemoryUnavailable
            }
            ChatError::Memory(_) => ChatErrorKind::Internal,
            ChatError::Session(SessionError::Conflict { .. }) => ChatErrorKind::SessionConflict,
            ChatError::Session(SessionError::NotFound { .. }) => ChatErrorKind::SessionNotFound,
            ChatError::Session(_) => ChatErrorKind::Internal,
            ChatError::Stream(StreamError::GenerationTimeout { .. }) => {
                ChatErrorKind::GenerationTimeout
            }
            ChatError::Stream(_) => ChatErrorKind::GenerationFailed,
            ChatError::Generation { .. } => ChatErrorKind::GenerationFailed,
            ChatError::Internal { .. } => ChatErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Memory(e) => e.is_retryable(),
            ChatError::Session(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_retryable_session_conflict() {
        let err = ChatError::from(SessionError::Conflict {
            session_id: "s1".to_string(),
            attempts: 10,
        });
        assert_eq!(err.kind(), ChatErrorKind::SessionConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn total_memory_outage_has_its_own_kind() {
        let err = ChatError::from(MemoryError::AllRealmsUnavailable { attempted: 4 });
        assert_eq!(err.kind(), ChatErrorKind::MemoryUnavailable);
    }

    #[test]
    fn server_side_http_failures_are_retryable() {
        assert!(MemoryError::Http { status: 503, reason: "unavailable".into() }.is_retryable());
        assert!(MemoryError::Http { status: 429, reason: "rate limited".into() }.is_retryable());
        assert!(!MemoryError::Http { status: 404, reason: "missing".into() }.is_retryable());
    }
}
