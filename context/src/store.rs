//! The session store: load/create/mutate/delete with per-session locking.

use crate::backend::SessionBackend;
use config::SessionConfig;
use cq_core::types::{ActingIdentity, ChatMode, Session};
use errors::SessionError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SESSION_KEY_PREFIX: &str = "chat:session:";
const LOCK_KEY_PREFIX: &str = "chat:session-lock:";

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    fn session_key(session_id: Uuid) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }

    fn lock_key(session_id: Uuid) -> String {
        format!("{LOCK_KEY_PREFIX}{session_id}")
    }

    pub async fn load(&self, session_id: Uuid) -> Result<Session, SessionError> {
        let raw = self
            .backend
            .get(&Self::session_key(session_id))
            .await?
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })?;

        serde_json::from_str(&raw).map_err(|e| SessionError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Create and persist a fresh session. Used on the first message for
    /// a session id not present in the store.
    pub async fn create(
        &self,
        session_id: Uuid,
        identity: ActingIdentity,
        mode: ChatMode,
    ) -> Result<Session, SessionError> {
        let session = Session::new(session_id, identity, mode);
        self.write(&session).await?;
        info!(session_id = %session_id, mode = %mode, "created session");
        Ok(session)
    }

    /// Atomic read-modify-write under the per-session exclusive lock.
    ///
    /// Lock acquisition is retried a bounded number of times; exhaustion
    /// surfaces `SessionError::Conflict` and the closure never runs.
    /// History is trimmed and the TTL refreshed on every successful call.
    pub async fn mutate<F>(&self, session_id: Uuid, apply: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let lock_key = Self::lock_key(session_id);
        let token = self.acquire_with_retry(session_id, &lock_key).await?;

        let result = self.mutate_locked(session_id, apply).await;

        match self.backend.release_lock(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => {
                // Lock TTL lapsed mid-mutate; the write already happened,
                // so just record it.
                warn!(session_id = %session_id, "session lock expired before release");
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to release session lock");
            }
        }

        result
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<bool, SessionError> {
        let existed = self.backend.delete(&Self::session_key(session_id)).await?;
        if existed {
            info!(session_id = %session_id, "deleted session");
        }
        Ok(existed)
    }

    async fn mutate_locked<F>(&self, session_id: Uuid, apply: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let mut session = self.load(session_id).await?;

        apply(&mut session);

        session.trim_history(self.config.max_history);
        session.last_activity_at = chrono::Utc::now().timestamp();

        self.write(&session).await?;
        Ok(session)
    }

    async fn acquire_with_retry(
        &self,
        session_id: Uuid,
        lock_key: &str,
    ) -> Result<String, SessionError> {
        for attempt in 0..self.config.lock_retry_attempts {
            if let Some(token) = self
                .backend
                .acquire_lock(lock_key, self.config.lock_ttl_secs)
                .await?
            {
                if attempt > 0 {
                    debug!(session_id = %session_id, attempt, "session lock acquired after contention");
                }
                return Ok(token);
            }
            tokio::time::sleep(Duration::from_millis(self.config.lock_retry_delay_ms)).await;
        }

        Err(SessionError::Conflict {
            session_id: session_id.to_string(),
            attempts: self.config.lock_retry_attempts,
        })
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        let raw = serde_json::to_string(session).map_err(|e| SessionError::Serialization {
            reason: e.to_string(),
        })?;
        self.backend
            .set(&Self::session_key(session.session_id), &raw, self.config.ttl_secs)
            .await
    }
}
