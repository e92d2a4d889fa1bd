//! # Colloquy Memory
//!
//! Hierarchical memory resolution: the HTTP client for the external
//! long-term memory store, the four-realm searcher with precedence
//! merging, and the merged-result cache.
//!
//! The searcher degrades gracefully: realms fail individually without
//! failing the call, and only a total outage surfaces as
//! `MemoryError::AllRealmsUnavailable`.

pub mod client;
pub mod result_cache;
pub mod retry;
pub mod searcher;
pub mod telemetry;

pub use client::HttpMemoryClient;
pub use result_cache::ResultCache;
pub use retry::{RetryConfig, with_retry};
pub use searcher::{HierarchicalSearcher, SearchOutcome, SearchQuery, SharedMemoryStore};
pub use telemetry::MemoryTelemetry;
