//! # Colloquy Dialogue
//!
//! Turn processing: the tutor/agent mode state machine, the per-mode
//! processors that shape how resolved memory is used, the streaming
//! response pipeline, and the `ChatEngine` facade the transport layer
//! calls into.

pub mod agent;
pub mod engine;
pub mod prompt;
pub mod state;
pub mod streaming;
pub mod tutor;

pub use agent::{AgentProcessor, Intent, TaskKind, analyze_intent};
pub use engine::{
    ChatEngine, ModeSwitch, SessionSummary, SharedGenerator, TurnOutput, TurnRequest, TurnResponse,
};
pub use state::{ModeEffect, ModeEvent, transition};
pub use streaming::{ResponseStream, StreamEvent};
pub use tutor::{AssembledTurn, SearchPlan, TutorProcessor};
