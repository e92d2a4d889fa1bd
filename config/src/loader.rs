//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles. Environment variables override default values.
//!
//! # Naming Convention
//! - `CQ_SEARCH_*`: memory search settings
//! - `CQ_SESSION_*`: context-store settings
//! - `CQ_STREAM_*`: streaming settings
//! - `CQ_CONSOLIDATION_*`: consolidation settings
//! - `RD_*`: Redis settings
//! - `MS_*`: memory service settings

use crate::config::Config;
use std::env;
use validator::Validate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("configuration failed validation: {reason}")]
    Validation { reason: String },
}

/// Load configuration from environment variables on top of defaults.
///
/// ## Environment Variables
/// - `CQ_SEARCH_REALM_TIMEOUT_MS`: per-realm search timeout (default: 2000)
/// - `CQ_SEARCH_MAX_RESULTS`: merged-result cap (default: 50)
/// - `CQ_SEARCH_MAX_DEPTH`: traversal depth 1-3 (default: 2)
/// - `CQ_SEARCH_CACHE_TTL_SECS`: result cache TTL (default: 900)
/// - `CQ_SESSION_TTL_SECS`: session inactivity TTL (default: 86400)
/// - `CQ_SESSION_MAX_HISTORY`: history bound (default: 50)
/// - `CQ_SESSION_LOCK_RETRIES`: lock-acquire attempts (default: 10)
/// - `CQ_STREAM_STALL_TIMEOUT_MS`: generation stall timeout (default: 30000)
/// - `CQ_CONSOLIDATION_WINDOW`: messages per trigger window (default: 10)
/// - `CQ_CONSOLIDATION_WORKERS`: worker pool size (default: 2)
/// - `CQ_CONSOLIDATION_MAX_RETRIES`: retry ceiling (default: 3)
/// - `RD_URL`: Redis connection string (default: "redis://localhost:6379")
/// - `MS_BASE_URL`: memory service base URL (default: "http://localhost:8001")
/// - `MS_API_TOKEN`: memory service bearer token (default: unset)
/// - `MS_TIMEOUT_SECONDS`: memory service request timeout (default: 10)
pub fn load_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(v) = parse_env("CQ_SEARCH_REALM_TIMEOUT_MS")? {
        config.search.per_realm_timeout_ms = v;
    }
    if let Some(v) = parse_env("CQ_SEARCH_MAX_RESULTS")? {
        config.search.max_results = v;
    }
    if let Some(v) = parse_env("CQ_SEARCH_MAX_DEPTH")? {
        config.search.default_max_depth = v;
    }
    if let Some(v) = parse_env("CQ_SEARCH_CACHE_TTL_SECS")? {
        config.search.cache_ttl_secs = v;
    }

    if let Some(v) = parse_env("CQ_SESSION_TTL_SECS")? {
        config.session.ttl_secs = v;
    }
    if let Some(v) = parse_env("CQ_SESSION_MAX_HISTORY")? {
        config.session.max_history = v;
    }
    if let Some(v) = parse_env("CQ_SESSION_LOCK_RETRIES")? {
        config.session.lock_retry_attempts = v;
    }

    if let Some(v) = parse_env("CQ_STREAM_STALL_TIMEOUT_MS")? {
        config.streaming.stall_timeout_ms = v;
    }

    if let Some(v) = parse_env("CQ_CONSOLIDATION_WINDOW")? {
        config.consolidation.window_messages = v;
    }
    if let Some(v) = parse_env("CQ_CONSOLIDATION_WORKERS")? {
        config.consolidation.workers = v;
    }
    if let Some(v) = parse_env("CQ_CONSOLIDATION_MAX_RETRIES")? {
        config.consolidation.max_retries = v;
    }

    if let Ok(url) = env::var("RD_URL") {
        config.providers.redis.url = url;
    }
    if let Ok(url) = env::var("MS_BASE_URL") {
        config.providers.memory_service.base_url = url;
    }
    if let Ok(token) = env::var("MS_API_TOKEN") {
        config.providers.memory_service.api_token = token;
    }
    if let Some(v) = parse_env("MS_TIMEOUT_SECONDS")? {
        config.providers.memory_service.request_timeout_secs = v;
    }

    config.validate().map_err(|e| ConfigError::Validation {
        reason: e.to_string(),
    })?;

    Ok(config)
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
