//! # Colloquy Context
//!
//! The context store: per-conversation session state held in a shared
//! expiring key-value store so any process instance can serve any
//! session.
//!
//! All writes go through [`SessionStore::mutate`], an atomic
//! read-modify-write under a per-session advisory lock. No call site can
//! bypass locking; operations on different session ids never contend.

pub mod backend;
pub mod store;

pub use backend::{InMemoryBackend, RedisBackend, SessionBackend};
pub use store::SessionStore;
