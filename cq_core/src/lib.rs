//! # Colloquy Core
//!
//! Shared types, traits, and utilities for the Colloquy conversation engine.
//!
//! This crate provides:
//! - The four-realm authority hierarchy and its precedence ordering
//! - Validated identity types for clients, actors, classes, and skill modules
//! - Session, message, and mode-state definitions
//! - Core traits for the external memory store and response generator

pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use traits::{GenerationChunk, GenerationOutput, MemoryStore, PromptContext, ResponseGenerator};
pub use types::{
    ActingIdentity, ActorClassId, ActorId, ChatMessage, ChatMode, ClientId, ComprehensionSignal,
    FactUpsert, LearningProgress, MemoryEntry, MemoryRef, MessageRole, ModeState, Realm, Session,
    SkillModuleId, TaskOutcome, UpsertAck,
};
