//! Shared test fixtures for the Colloquy workspace.
//!
//! Provides:
//! - Unique-id helpers for test isolation
//! - A shared Redis testcontainer fixture (lazily started once per test
//!   process, skipped gracefully when Docker is unavailable)
//! - Programmable stub implementations of the external collaborators
//!   (`MemoryStore`, `ResponseGenerator`)

mod fixtures;
mod stubs;

pub use fixtures::*;
pub use stubs::*;
