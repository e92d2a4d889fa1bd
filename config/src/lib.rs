//! # Configuration System
//!
//! Centralized configuration for the Colloquy conversation engine.
//!
//! This crate provides:
//! - Configuration structures for all engine components
//! - Environment variable loading (12-factor app principles)
//! - Configuration validation
//!
//! Environment variables override defaults; invalid values surface as
//! validation errors rather than being silently clamped.

pub mod config;
pub mod loader;

pub use config::{
    Config, ConsolidationConfig, MemoryServiceConfig, ProviderConfig, RedisConfig, SearchConfig,
    SessionConfig, StreamingConfig, TutorConfig,
};
pub use loader::{ConfigError, load_from_env};
pub use validator::Validate;
