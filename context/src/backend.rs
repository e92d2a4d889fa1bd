//! Key-value backends for session storage.
//!
//! The backend contract is deliberately small: TTL'd get/set/delete plus
//! an advisory lock primitive (token-fenced acquire/release). Expiry is
//! backend-enforced; the store never runs a sweep of its own.

use async_trait::async_trait;
use dashmap::DashMap;
use errors::SessionError;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Write `value` with a fresh TTL, replacing any existing value.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), SessionError>;

    /// Returns whether a value existed.
    async fn delete(&self, key: &str) -> Result<bool, SessionError>;

    /// Try to acquire an advisory lock. Returns the holder token on
    /// success, `None` when another holder has it.
    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, SessionError>;

    /// Release a lock if `token` still holds it. Returns whether the
    /// lock was released by this call.
    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool, SessionError>;
}

pub struct RedisBackend {
    #[allow(dead_code)]
    client: Arc<redis::Client>,
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn new(connection_string: &str) -> Result<Self, SessionError> {
        let client =
            redis::Client::open(connection_string).map_err(|e| SessionError::Backend {
                backend: "Redis".to_string(),
                reason: e.to_string(),
            })?;

        let connection_manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| SessionError::Backend {
                    backend: "Redis".to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self {
            client: Arc::new(client),
            connection_manager,
        })
    }

    fn query_error(e: redis::RedisError) -> SessionError {
        SessionError::Backend {
            backend: "Redis".to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.connection_manager.clone();
        conn.get(key).await.map_err(Self::query_error)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), SessionError> {
        let mut conn = self.connection_manager.clone();
        conn.set_ex(key, value, ttl_secs)
            .await
            .map_err(Self::query_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        let mut conn = self.connection_manager.clone();
        let removed: i32 = conn.del(key).await.map_err(Self::query_error)?;
        Ok(removed > 0)
    }

    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, SessionError> {
        let lock_token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.connection_manager.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(&lock_token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(Self::query_error)?;

        Ok(result.map(|_| lock_token))
    }

    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool, SessionError> {
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.connection_manager.clone();
        let result: i32 = script
            .key(lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::query_error)?;

        Ok(result == 1)
    }
}

/// Process-local backend with the same TTL and lock semantics, used by
/// tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryBackend {
    values: DashMap<String, (String, Instant)>,
    locks: DashMap<String, (String, Instant)>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let expired = match self.values.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if Instant::now() < *expires_at {
                    return Ok(Some(value.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), SessionError> {
        self.values.insert(
            key.to_string(),
            (
                value.to_string(),
                Instant::now() + Duration::from_secs(ttl_secs),
            ),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        Ok(self.values.remove(key).is_some())
    }

    async fn acquire_lock(
        &self,
        lock_key: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, SessionError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();

        // Entry-level locking in dashmap keeps check-and-set atomic.
        let mut acquired = false;
        let mut slot = self
            .locks
            .entry(lock_key.to_string())
            .or_insert_with(|| {
                acquired = true;
                (token.clone(), now + Duration::from_secs(ttl_secs))
            });
        if !acquired {
            let (_, expires_at) = slot.value();
            if now >= *expires_at {
                *slot.value_mut() = (token.clone(), now + Duration::from_secs(ttl_secs));
                acquired = true;
            }
        }
        drop(slot);

        Ok(acquired.then_some(token))
    }

    async fn release_lock(&self, lock_key: &str, token: &str) -> Result<bool, SessionError> {
        let removed = self
            .locks
            .remove_if(lock_key, |_, (holder, _)| holder == token)
            .is_some();
        Ok(removed)
    }
}
