//! The conversation engine facade.
//!
//! Orchestrates one turn: load-or-create the session, resolve memory,
//! run the active mode processor, generate (streamed or complete),
//! persist the turn through a single `mutate`, and fire the
//! consolidation trigger when the window closes. Memory outages degrade
//! to history-only turns; they never fail the call.

use crate::agent::{AgentProcessor, analyze_intent};
use crate::state::{ModeEvent, transition};
use crate::streaming::{ResponseStream, StreamEvent, pump_stream};
use crate::tutor::{AssembledTurn, TutorProcessor};
use config::Config;
use consolidation::{ConsolidationPipeline, should_trigger};
use context::SessionStore;
use cq_core::traits::ResponseGenerator;
use cq_core::types::{
    ActorId, ChatMessage, ChatMode, LearningProgress, MemoryRef, MessageRole, ModeState, Realm,
    Session,
};
use errors::{ChatError, MemoryError, SessionError};
use memory::{HierarchicalSearcher, SearchOutcome, SearchQuery};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type SharedGenerator = Arc<dyn ResponseGenerator<Error = BoxError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Absent: a new session is created.
    pub session_id: Option<Uuid>,
    pub identity: cq_core::types::ActingIdentity,
    pub message: String,
    /// Desired mode; a mismatch with the stored session switches it.
    pub mode: Option<ChatMode>,
    /// Realm override; defaults to the active mode's bias.
    pub realms: Option<Vec<Realm>>,
    pub max_depth: Option<u8>,
    pub streaming: bool,
}

impl TurnRequest {
    pub fn new(identity: cq_core::types::ActingIdentity, message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            identity,
            message: message.into(),
            mode: None,
            realms: None,
            max_depth: None,
            streaming: false,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub text: String,
    pub mode: ChatMode,
    /// Some realms were unavailable or the resolution was skipped.
    pub degraded: bool,
    /// Every realm failed; the answer used conversation history only.
    pub memory_unavailable: bool,
    pub realms_accessed: HashMap<Realm, usize>,
    pub memory_context_used: Vec<String>,
    pub follow_up_topics: Vec<String>,
    pub memory_query_time_ms: u64,
}

pub enum TurnOutput {
    Complete(Box<TurnResponse>),
    Streaming {
        session_id: Uuid,
        message_id: Uuid,
        stream: ResponseStream,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitch {
    pub previous_mode: ChatMode,
    pub new_mode: ChatMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub mode: ChatMode,
    pub message_count: u64,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub session_duration_minutes: i64,
    pub learning: Option<LearningProgress>,
}

pub struct ChatEngine {
    store: Arc<SessionStore>,
    searcher: Arc<HierarchicalSearcher>,
    generator: SharedGenerator,
    consolidation: Arc<ConsolidationPipeline>,
    tutor: TutorProcessor,
    agent: AgentProcessor,
    config: Config,
}

impl ChatEngine {
    pub fn new(
        store: Arc<SessionStore>,
        searcher: Arc<HierarchicalSearcher>,
        generator: SharedGenerator,
        consolidation: Arc<ConsolidationPipeline>,
        config: Config,
    ) -> Self {
        Self {
            store,
            searcher,
            generator,
            tutor: TutorProcessor::new(config.tutor.clone()),
            agent: AgentProcessor::new(),
            consolidation,
            config,
        }
    }

    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnOutput, ChatError> {
        let session = self.load_or_create(&request).await?;
        let session_id = session.session_id;

        // Resolve memory for the active mode.
        let (plan, intent) = match &session.mode_state {
            ModeState::Tutor { progress } => {
                (self.tutor.search_plan(progress, &request.message), None)
            }
            ModeState::Agent { .. } => {
                let intent = analyze_intent(&request.message);
                let plan = self.agent.search_plan(&intent, &request.message);
                (plan, Some(intent))
            }
        };

        let query = SearchQuery {
            anchor: plan.anchor,
            identity: session.identity.clone(),
            realms: request.realms.clone().unwrap_or(plan.realms),
            max_depth: request
                .max_depth
                .unwrap_or(self.config.search.default_max_depth),
        };

        let (outcome, memory_unavailable) = match self.searcher.resolve(&query).await {
            Ok(outcome) => (outcome, false),
            Err(MemoryError::AllRealmsUnavailable { attempted }) => {
                warn!(
                    session_id = %session_id,
                    attempted,
                    "memory unavailable, answering from history only"
                );
                counter!("engine_memory_unavailable_total").increment(1);
                (empty_outcome(), true)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "memory resolution failed, degrading");
                (empty_outcome(), true)
            }
        };

        // Shape the turn.
        let history = session.history.clone();
        let mut assembled = match &session.mode_state {
            ModeState::Tutor { progress } => {
                let signal = self.generator.assess_comprehension(&request.message);
                self.tutor.assemble(
                    progress,
                    &request.message,
                    &outcome.entries,
                    signal,
                    history,
                )
            }
            ModeState::Agent { .. } => {
                let intent = intent.expect("agent intent computed above");
                self.agent
                    .assemble(&intent, &request.message, &outcome.entries, history)
            }
        };

        if memory_unavailable {
            assembled.prompt.instructions.push_str(
                "\nMemory context is unavailable right now; rely on the \
                 conversation history and general capability only.",
            );
        }

        let snapshot: Vec<MemoryRef> = outcome
            .entries
            .iter()
            .map(|e| MemoryRef {
                id: e.id.clone(),
                realm: e.realm,
            })
            .collect();

        let user_message = ChatMessage::new(MessageRole::User, request.message.clone());
        let mode = session.mode();

        if request.streaming {
            match self.generator.generate_stream(&assembled.prompt).await {
                Ok(source) => {
                    return Ok(self.spawn_streaming_turn(
                        &session,
                        user_message,
                        assembled,
                        outcome,
                        snapshot,
                        memory_unavailable,
                        source,
                    ));
                }
                Err(e) => {
                    // Pipeline error before the first chunk: fall back to
                    // one complete, non-streamed response.
                    warn!(session_id = %session_id, error = %e, "stream setup failed, falling back");
                    counter!("engine_stream_fallbacks_total").increment(1);
                }
            }
        }

        let generated = self
            .generator
            .generate(&assembled.prompt)
            .await
            .map_err(|e| ChatError::Generation {
                reason: e.to_string(),
            })?;

        let persisted = self
            .finalize_turn(
                session_id,
                user_message,
                generated.text.clone(),
                assembled.events.clone(),
                snapshot,
                outcome.query_time_ms,
            )
            .await?;
        self.maybe_consolidate(&persisted);

        histogram!("engine_turn_memory_entries").record(outcome.entries.len() as f64);

        Ok(TurnOutput::Complete(Box::new(TurnResponse {
            session_id,
            message_id: Uuid::new_v4(),
            text: generated.text,
            mode,
            degraded: outcome.degraded || memory_unavailable,
            memory_unavailable,
            realms_accessed: outcome.realms_accessed,
            memory_context_used: outcome
                .entries
                .iter()
                .take(10)
                .map(|e| e.entity_name.clone())
                .collect(),
            follow_up_topics: assembled.follow_up_topics,
            memory_query_time_ms: outcome.query_time_ms,
        })))
    }

    /// Explicit mode switch. Clears exactly the outgoing mode's sub-state
    /// while preserving message history, atomically with concurrent turns.
    pub async fn switch_mode(
        &self,
        session_id: Uuid,
        new_mode: ChatMode,
    ) -> Result<ModeSwitch, ChatError> {
        let previous = Arc::new(std::sync::Mutex::new(None));
        let previous_in = Arc::clone(&previous);

        self.store
            .mutate(session_id, move |session| {
                *previous_in.lock().unwrap() = Some(session.mode());
                let (state, effects) = transition(
                    session.mode_state.clone(),
                    ModeEvent::SwitchTo(new_mode),
                );
                session.mode_state = state;
                for effect in effects {
                    tracing::debug!(session_id = %session.session_id, ?effect, "mode switch");
                }
            })
            .await?;

        let previous_mode = previous
            .lock()
            .unwrap()
            .expect("mutate ran, previous mode recorded");
        info!(session_id = %session_id, from = %previous_mode, to = %new_mode, "mode switched");

        Ok(ModeSwitch {
            previous_mode,
            new_mode,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionSummary, ChatError> {
        let session = self.store.load(session_id).await?;
        Ok(SessionSummary {
            session_id,
            mode: session.mode(),
            message_count: session.message_count,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            session_duration_minutes: (session.last_activity_at - session.created_at) / 60,
            learning: session.learning_progress().cloned(),
        })
    }

    /// Delete a session, consolidating whatever the trigger windows
    /// haven't covered yet.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<bool, ChatError> {
        match self.store.load(session_id).await {
            Ok(session) => {
                self.submit_remaining(&session);
                Ok(self.store.delete(session_id).await?)
            }
            Err(SessionError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// TTL-expiry notification hook: the store record is already gone,
    /// so the notifier supplies the slice.
    pub fn notify_expired(
        &self,
        session_id: Uuid,
        actor_id: ActorId,
        mode: ChatMode,
        messages: Vec<ChatMessage>,
    ) {
        if messages.is_empty() {
            return;
        }
        if let Err(e) = self
            .consolidation
            .submit(session_id, actor_id, mode, messages)
        {
            warn!(session_id = %session_id, error = %e, "expiry consolidation trigger dropped");
        }
    }

    async fn load_or_create(&self, request: &TurnRequest) -> Result<Session, ChatError> {
        let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);

        let session = match self.store.load(session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound { .. }) => {
                let initial_mode = request.mode.unwrap_or(ChatMode::Agent);
                self.store
                    .create(session_id, request.identity.clone(), initial_mode)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        // Requested mode wins over the stored one, via a real transition.
        if let Some(requested) = request.mode {
            if requested != session.mode() {
                warn!(
                    session_id = %session_id,
                    stored = %session.mode(),
                    requested = %requested,
                    "mode mismatch on submit, switching"
                );
                return self
                    .store
                    .mutate(session_id, move |session| {
                        let (state, _) = transition(
                            session.mode_state.clone(),
                            ModeEvent::SwitchTo(requested),
                        );
                        session.mode_state = state;
                    })
                    .await
                    .map_err(Into::into);
            }
        }

        Ok(session)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_streaming_turn(
        &self,
        session: &Session,
        user_message: ChatMessage,
        assembled: AssembledTurn,
        outcome: SearchOutcome,
        snapshot: Vec<MemoryRef>,
        memory_unavailable: bool,
        source: futures_util::stream::BoxStream<'static, Result<String, BoxError>>,
    ) -> TurnOutput {
        let (tx, rx) = mpsc::channel(self.config.streaming.channel_capacity);
        let session_id = session.session_id;
        let message_id = Uuid::new_v4();
        let mode = session.mode();

        let store = Arc::clone(&self.store);
        let consolidation = Arc::clone(&self.consolidation);
        let stall = Duration::from_millis(self.config.streaming.stall_timeout_ms);
        let chunk_max = self.config.streaming.chunk_max_chars;
        let window = self.config.consolidation.window_messages;
        let query_time_ms = outcome.query_time_ms;

        tokio::spawn(async move {
            let _ = tx
                .send(StreamEvent::Metadata {
                    session_id,
                    message_id,
                    mode,
                    realms_accessed: outcome.realms_accessed.clone(),
                    degraded: outcome.degraded || memory_unavailable,
                    memory_query_time_ms: query_time_ms,
                })
                .await;

            let produced = pump_stream(
                source,
                &tx,
                stall,
                chunk_max,
                assembled.follow_up_topics.clone(),
            )
            .await;

            if produced.cancelled {
                counter!("engine_streams_cancelled_total").increment(1);
            }

            // The turn is recorded either way: a cancelled or errored
            // stream persists the partial transcript so history stays
            // consistent.
            let events = assembled.events;
            let text = produced.text;
            let result = store
                .mutate(session_id, move |session| {
                    apply_turn(session, user_message, text, events, snapshot, query_time_ms);
                })
                .await;

            match result {
                Ok(session) => {
                    trigger_if_due(&consolidation, &store, &session, window).await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to persist streamed turn");
                }
            }
        });

        TurnOutput::Streaming {
            session_id,
            message_id,
            stream: ResponseStream::new(rx),
        }
    }

    async fn finalize_turn(
        &self,
        session_id: Uuid,
        user_message: ChatMessage,
        assistant_text: String,
        events: Vec<ModeEvent>,
        snapshot: Vec<MemoryRef>,
        query_time_ms: u64,
    ) -> Result<Session, SessionError> {
        self.store
            .mutate(session_id, move |session| {
                apply_turn(
                    session,
                    user_message,
                    assistant_text,
                    events,
                    snapshot,
                    query_time_ms,
                );
            })
            .await
    }

    fn maybe_consolidate(&self, session: &Session) {
        let window = self.config.consolidation.window_messages;
        let consolidation = Arc::clone(&self.consolidation);
        let store = Arc::clone(&self.store);
        let session = session.clone();
        tokio::spawn(async move {
            trigger_if_due(&consolidation, &store, &session, window).await;
        });
    }

    fn submit_remaining(&self, session: &Session) {
        let pending = session
            .message_count
            .saturating_sub(session.consolidated_through) as usize;
        if pending == 0 {
            return;
        }
        let slice_start = session.history.len().saturating_sub(pending);
        let messages = session.history[slice_start..].to_vec();
        if messages.is_empty() {
            return;
        }

        if let Err(e) = self.consolidation.submit(
            session.session_id,
            session.identity.actor_id.clone(),
            session.mode(),
            messages,
        ) {
            warn!(session_id = %session.session_id, error = %e, "final consolidation trigger dropped");
        }
    }
}

fn apply_turn(
    session: &mut Session,
    user_message: ChatMessage,
    assistant_text: String,
    events: Vec<ModeEvent>,
    snapshot: Vec<MemoryRef>,
    query_time_ms: u64,
) {
    session.push_message(user_message);
    session.push_message(ChatMessage::new(MessageRole::Assistant, assistant_text));
    for event in events {
        let (state, _) = transition(session.mode_state.clone(), event);
        session.mode_state = state;
    }
    session.memory_snapshot = snapshot;
    session.total_memory_query_ms += query_time_ms;
}

/// Fire the window trigger and advance the watermark. Concurrent turns
/// can double-fire on the same window; idempotent upserts make that
/// harmless.
async fn trigger_if_due(
    consolidation: &Arc<ConsolidationPipeline>,
    store: &Arc<SessionStore>,
    session: &Session,
    window: u64,
) {
    if !should_trigger(session.message_count, session.consolidated_through, window) {
        return;
    }

    let pending = session
        .message_count
        .saturating_sub(session.consolidated_through) as usize;
    let slice_start = session.history.len().saturating_sub(pending);
    let messages = session.history[slice_start..].to_vec();
    if messages.is_empty() {
        return;
    }

    if let Err(e) = consolidation.submit(
        session.session_id,
        session.identity.actor_id.clone(),
        session.mode(),
        messages,
    ) {
        warn!(session_id = %session.session_id, error = %e, "window consolidation trigger dropped");
        return;
    }

    let watermark = session.message_count;
    if let Err(e) = store
        .mutate(session.session_id, move |session| {
            session.consolidated_through = session.consolidated_through.max(watermark);
        })
        .await
    {
        warn!(session_id = %session.session_id, error = %e, "failed to advance consolidation watermark");
    }
}

fn empty_outcome() -> SearchOutcome {
    SearchOutcome {
        entries: Vec::new(),
        realms_accessed: HashMap::new(),
        unavailable_realms: Realm::all().to_vec(),
        relationships_traversed: 0,
        query_time_ms: 0,
        degraded: true,
        from_cache: false,
    }
}
