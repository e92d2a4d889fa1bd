//! # Configuration Structures
//!
//! All configuration structures for the Colloquy engine.
//!
//! Every structure:
//! - Uses `serde` for serialization/deserialization with `#[serde(default)]`
//! - Uses `validator` for input validation
//! - Carries its documented defaults in the `Default` impl

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level configuration aggregating all engine subsystems.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Hierarchical memory search configuration
    #[serde(default)]
    #[validate(nested)]
    pub search: SearchConfig,

    /// Context-store (session) configuration
    #[serde(default)]
    #[validate(nested)]
    pub session: SessionConfig,

    /// Tutor-mode configuration
    #[serde(default)]
    #[validate(nested)]
    pub tutor: TutorConfig,

    /// Streaming response pipeline configuration
    #[serde(default)]
    #[validate(nested)]
    pub streaming: StreamingConfig,

    /// Consolidation pipeline configuration
    #[serde(default)]
    #[validate(nested)]
    pub consolidation: ConsolidationConfig,

    /// External collaborator endpoints (Redis, memory service)
    #[serde(default)]
    #[validate(nested)]
    pub providers: ProviderConfig,
}

/// Hierarchical memory searcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SearchConfig {
    /// Per-realm search timeout. A realm that misses it contributes zero
    /// entries and is flagged unavailable; it never fails the whole call.
    #[serde(default = "default_per_realm_timeout_ms")]
    #[validate(range(min = 100, max = 30_000))]
    pub per_realm_timeout_ms: u64,

    /// Merged-result cap after precedence resolution.
    #[serde(default = "default_max_results")]
    #[validate(range(min = 1, max = 500))]
    pub max_results: usize,

    /// Relationship-traversal depth passed to the memory store (1-3 hops).
    #[serde(default = "default_max_depth")]
    #[validate(range(min = 1, max = 3))]
    pub default_max_depth: u8,

    /// Merged-result cache TTL.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cache capacity; the oldest entry is evicted past this.
    #[serde(default = "default_cache_max_entries")]
    #[validate(range(min = 1))]
    pub cache_max_entries: usize,
}

fn default_per_realm_timeout_ms() -> u64 {
    2_000
}
fn default_max_results() -> usize {
    50
}
fn default_max_depth() -> u8 {
    2
}
fn default_cache_ttl_secs() -> u64 {
    900
}
fn default_cache_max_entries() -> usize {
    1_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            per_realm_timeout_ms: default_per_realm_timeout_ms(),
            max_results: default_max_results(),
            default_max_depth: default_max_depth(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// Context-store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SessionConfig {
    /// Inactivity TTL, store-enforced and refreshed on every mutate.
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub ttl_secs: u64,

    /// History bound; oldest turns are trimmed on every mutate.
    #[serde(default = "default_max_history")]
    #[validate(range(min = 2, max = 1_000))]
    pub max_history: usize,

    /// TTL on the per-session advisory lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Bounded lock-acquire retries before surfacing a conflict.
    #[serde(default = "default_lock_retry_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub lock_retry_attempts: u32,

    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
}

fn default_session_ttl_secs() -> u64 {
    86_400
}
fn default_max_history() -> usize {
    50
}
fn default_lock_ttl_secs() -> u64 {
    30
}
fn default_lock_retry_attempts() -> u32 {
    10
}
fn default_lock_retry_delay_ms() -> u64 {
    50
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_history: default_max_history(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}

/// Tutor-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TutorConfig {
    /// Follow-up topic suggestions per turn (at most 3).
    #[serde(default = "default_max_follow_up_topics")]
    #[validate(range(min = 1, max = 3))]
    pub max_follow_up_topics: usize,

    /// Resolved entries included in the prompt context.
    #[serde(default = "default_max_context_entries")]
    #[validate(range(min = 1, max = 20))]
    pub max_context_entries: usize,
}

fn default_max_follow_up_topics() -> usize {
    3
}
fn default_max_context_entries() -> usize {
    5
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            max_follow_up_topics: default_max_follow_up_topics(),
            max_context_entries: default_max_context_entries(),
        }
    }
}

/// Streaming pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct StreamingConfig {
    /// Bounded channel capacity between producer and consumer.
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1, max = 1_024))]
    pub channel_capacity: usize,

    /// Target chunk size for the sentence-boundary chunker.
    #[serde(default = "default_chunk_max_chars")]
    #[validate(range(min = 10, max = 4_096))]
    pub chunk_max_chars: usize,

    /// Per-chunk stall timeout; on expiry the stream is terminated with
    /// an error event and a completion marker.
    #[serde(default = "default_stall_timeout_ms")]
    #[validate(range(min = 100))]
    pub stall_timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    32
}
fn default_chunk_max_chars() -> usize {
    50
}
fn default_stall_timeout_ms() -> u64 {
    30_000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            chunk_max_chars: default_chunk_max_chars(),
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

/// Consolidation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConsolidationConfig {
    /// User-message window that closes a consolidation trigger.
    #[serde(default = "default_window_messages")]
    #[validate(range(min = 1, max = 1_000))]
    pub window_messages: u64,

    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 32))]
    pub workers: usize,

    /// Retry ceiling for transient memory-store failures.
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f32,

    /// Extracted facts below this confidence are not upserted.
    #[serde(default = "default_min_confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence: f32,
}

fn default_window_messages() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_workers() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f32 {
    2.0
}
fn default_min_confidence() -> f32 {
    0.7
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            window_messages: default_window_messages(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// External collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,

    #[serde(default)]
    #[validate(nested)]
    pub memory_service: MemoryServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    #[validate(length(min = 1))]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct MemoryServiceConfig {
    #[serde(default = "default_memory_service_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    /// Bearer token; empty disables the Authorization header.
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_memory_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

fn default_memory_service_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_memory_request_timeout_secs() -> u64 {
    10
}

impl Default for MemoryServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_memory_service_url(),
            api_token: String::new(),
            request_timeout_secs: default_memory_request_timeout_secs(),
        }
    }
}
