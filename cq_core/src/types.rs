use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Memory authority realm.
///
/// The four levels form a fixed, total ordering of authority:
/// `Client > Actor > ActorClass > SkillModule`. When two memory entries
/// describe the same logical fact, the entry from the higher-authority
/// realm always wins, regardless of relevance score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema,
    EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Realm {
    Client,
    Actor,
    ActorClass,
    SkillModule,
}

impl Realm {
    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            Realm::SkillModule => 1,
            Realm::ActorClass => 2,
            Realm::Actor => 3,
            Realm::Client => 4,
        }
    }

    /// True when `self` strictly outranks `other`.
    #[must_use]
    pub fn dominates(&self, other: Realm) -> bool {
        self.precedence() > other.precedence()
    }

    /// All realms in descending authority order.
    #[must_use]
    pub fn all() -> [Realm; 4] {
        [Realm::Client, Realm::Actor, Realm::ActorClass, Realm::SkillModule]
    }
}

impl PartialOrd for Realm {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Realm {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ClientId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid client ID"))
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActorId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid actor ID"))
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ActorClassId(String);

impl ActorClassId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ActorClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActorClassId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid actor class ID"))
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct SkillModuleId(String);

impl SkillModuleId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SkillModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SkillModuleId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid skill module ID"))
    }
}

/// The acting identity for one conversation: exactly one id per fixed
/// realm, plus zero-or-more subscribed skill modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ActingIdentity {
    pub client_id: ClientId,
    pub actor_id: ActorId,
    pub actor_class_id: ActorClassId,
    #[serde(default)]
    pub skill_modules: Vec<SkillModuleId>,
}

impl ActingIdentity {
    pub fn new(client_id: ClientId, actor_id: ActorId, actor_class_id: ActorClassId) -> Self {
        Self {
            client_id,
            actor_id,
            actor_class_id,
            skill_modules: Vec::new(),
        }
    }

    pub fn with_skill_modules(mut self, modules: Vec<SkillModuleId>) -> Self {
        self.skill_modules = modules;
        self
    }

    /// Entity ids scoped to a realm. Fixed realms have exactly one;
    /// `SkillModule` has one per subscription.
    pub fn entity_ids_for(&self, realm: Realm) -> Vec<&str> {
        match realm {
            Realm::Client => vec![self.client_id.as_str()],
            Realm::Actor => vec![self.actor_id.as_str()],
            Realm::ActorClass => vec![self.actor_class_id.as_str()],
            Realm::SkillModule => self.skill_modules.iter().map(SkillModuleId::as_str).collect(),
        }
    }

    /// Stable encoding used in cache keys. Skill modules are sorted so
    /// subscription order never changes the key.
    pub fn cache_component(&self) -> String {
        let mut modules: Vec<&str> = self.skill_modules.iter().map(SkillModuleId::as_str).collect();
        modules.sort_unstable();
        format!(
            "{}|{}|{}|{}",
            self.client_id,
            self.actor_id,
            self.actor_class_id,
            modules.join(",")
        )
    }
}

/// Behavioral mode governing how resolved memory is used in a turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema,
    EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChatMode {
    Tutor,
    Agent,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema, EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ChatMessage {
    pub message_id: uuid::Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Best-effort comprehension report from the response generator, used for
/// tutor-mode level adjustment. The engine never infers this itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComprehensionSignal {
    Comprehension,
    Confusion,
    Neutral,
}

/// One resolved memory entry as returned by the hierarchical searcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MemoryEntry {
    pub id: String,
    pub entity_name: String,
    pub content: String,
    /// Free-form fact type ("policy", "procedure", "concept", ...).
    pub kind: String,
    pub realm: Realm,
    pub relevance: f32,
    /// Hops from the queried anchor entity (1-3).
    pub hop_depth: u8,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MemoryEntry {
    /// Policy-shaped entries from the CLIENT realm act as hard overrides
    /// on response framing in agent mode.
    pub fn is_policy(&self) -> bool {
        let kind = self.kind.to_lowercase();
        ["policy", "rule", "requirement"].iter().any(|t| kind.contains(t))
    }

    pub fn related_topics(&self) -> Vec<String> {
        self.metadata
            .get("related_topics")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One durable fact submitted to the memory store. The `semantic_key` is
/// the upsert key: resubmitting a fact with the same key updates the
/// stored version instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct FactUpsert {
    pub semantic_key: String,
    pub entity_name: String,
    pub kind: String,
    pub content: String,
    pub confidence: f32,
    #[serde(default)]
    pub source_session: Option<uuid::Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Acknowledgement returned by a memory-store upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct UpsertAck {
    pub created: usize,
    pub updated: usize,
}

/// Provenance reference kept in the session's memory-context snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct MemoryRef {
    pub id: String,
    pub realm: Realm,
}

/// Tutor-mode learning state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct LearningProgress {
    pub topic: Option<String>,
    pub understanding_level: u8,
    #[serde(default)]
    pub prior_topics: Vec<String>,
}

impl LearningProgress {
    pub const MIN_LEVEL: u8 = 1;
    pub const MAX_LEVEL: u8 = 5;
    pub const DEFAULT_LEVEL: u8 = 3;
    pub const MAX_PRIOR_TOPICS: usize = 10;

    pub fn record_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if let Some(previous) = self.topic.replace(topic) {
            if !self.prior_topics.contains(&previous) {
                self.prior_topics.push(previous);
            }
            if self.prior_topics.len() > Self::MAX_PRIOR_TOPICS {
                let excess = self.prior_topics.len() - Self::MAX_PRIOR_TOPICS;
                self.prior_topics.drain(..excess);
            }
        }
    }

    pub fn raise_level(&mut self) {
        self.understanding_level = (self.understanding_level + 1).min(Self::MAX_LEVEL);
    }

    pub fn lower_level(&mut self) {
        self.understanding_level = self.understanding_level.saturating_sub(1).max(Self::MIN_LEVEL);
    }
}

impl Default for LearningProgress {
    fn default() -> Self {
        Self {
            topic: None,
            understanding_level: Self::DEFAULT_LEVEL,
            prior_topics: Vec::new(),
        }
    }
}

/// Outcome record appended by agent mode when a task-shaped request
/// completes; drained by the consolidation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct TaskOutcome {
    pub intent: String,
    pub action: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub procedures_followed: Vec<String>,
    pub completed_at: i64,
}

/// Mode-specific sub-state. Exactly one variant is live at a time; a mode
/// switch replaces the whole value while leaving message history alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeState {
    Tutor { progress: LearningProgress },
    Agent { outcomes: Vec<TaskOutcome> },
}

impl ModeState {
    pub fn for_mode(mode: ChatMode) -> Self {
        match mode {
            ChatMode::Tutor => ModeState::Tutor {
                progress: LearningProgress::default(),
            },
            ChatMode::Agent => ModeState::Agent { outcomes: Vec::new() },
        }
    }

    pub fn mode(&self) -> ChatMode {
        match self {
            ModeState::Tutor { .. } => ChatMode::Tutor,
            ModeState::Agent { .. } => ChatMode::Agent,
        }
    }
}

/// The durable state of one ongoing conversation. Exactly one
/// authoritative mutable copy exists at any instant; all writers go
/// through the context store's `mutate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Session {
    pub session_id: uuid::Uuid,
    pub identity: ActingIdentity,
    pub mode_state: ModeState,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub memory_snapshot: Vec<MemoryRef>,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub message_count: u64,
    /// History index (by message_count) already folded into long-term
    /// memory; lets overlapping consolidation slices stay idempotent.
    #[serde(default)]
    pub consolidated_through: u64,
    #[serde(default)]
    pub total_memory_query_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(session_id: uuid::Uuid, identity: ActingIdentity, mode: ChatMode) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            session_id,
            identity,
            mode_state: ModeState::for_mode(mode),
            history: Vec::new(),
            memory_snapshot: Vec::new(),
            created_at: now,
            last_activity_at: now,
            message_count: 0,
            consolidated_through: 0,
            total_memory_query_ms: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode_state.mode()
    }

    /// Append a message. `message_count` keeps counting even after older
    /// entries are trimmed away.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.history.push(message);
        self.message_count += 1;
    }

    /// Drop the oldest entries beyond `max_history`. The context store
    /// applies this on every mutate to cap the serialized record size.
    pub fn trim_history(&mut self, max_history: usize) {
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
    }

    pub fn learning_progress(&self) -> Option<&LearningProgress> {
        match &self.mode_state {
            ModeState::Tutor { progress } => Some(progress),
            ModeState::Agent { .. } => None,
        }
    }

    pub fn task_outcomes(&self) -> &[TaskOutcome] {
        match &self.mode_state {
            ModeState::Agent { outcomes } => outcomes,
            ModeState::Tutor { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_precedence_is_total_and_fixed() {
        assert!(Realm::Client.dominates(Realm::Actor));
        assert!(Realm::Actor.dominates(Realm::ActorClass));
        assert!(Realm::ActorClass.dominates(Realm::SkillModule));
        assert!(!Realm::SkillModule.dominates(Realm::Client));

        let mut realms = Realm::all();
        realms.sort();
        assert_eq!(
            realms,
            [Realm::SkillModule, Realm::ActorClass, Realm::Actor, Realm::Client]
        );
    }

    #[test]
    fn realm_wire_form_is_snake_case() {
        assert_eq!(Realm::SkillModule.to_string(), "skill_module");
        assert_eq!(
            serde_json::to_string(&Realm::ActorClass).unwrap(),
            "\"actor_class\""
        );
    }

    #[test]
    fn id_newtypes_reject_empty_and_oversized() {
        assert!(ClientId::new(String::new()).is_none());
        assert!(ActorId::new("a".repeat(101)).is_none());
        assert!(SkillModuleId::new("sales-email".to_string()).is_some());
    }

    #[test]
    fn identity_entity_ids_fan_out_per_realm() {
        let identity = ActingIdentity::new(
            ClientId::new("c1".into()).unwrap(),
            ActorId::new("a1".into()).unwrap(),
            ActorClassId::new("cl1".into()).unwrap(),
        )
        .with_skill_modules(vec![
            SkillModuleId::new("sk1".into()).unwrap(),
            SkillModuleId::new("sk2".into()).unwrap(),
        ]);

        assert_eq!(identity.entity_ids_for(Realm::Client), vec!["c1"]);
        assert_eq!(identity.entity_ids_for(Realm::SkillModule), vec!["sk1", "sk2"]);
    }

    #[test]
    fn cache_component_ignores_skill_module_order() {
        let base = ActingIdentity::new(
            ClientId::new("c1".into()).unwrap(),
            ActorId::new("a1".into()).unwrap(),
            ActorClassId::new("cl1".into()).unwrap(),
        );
        let forward = base.clone().with_skill_modules(vec![
            SkillModuleId::new("sk1".into()).unwrap(),
            SkillModuleId::new("sk2".into()).unwrap(),
        ]);
        let reversed = base.with_skill_modules(vec![
            SkillModuleId::new("sk2".into()).unwrap(),
            SkillModuleId::new("sk1".into()).unwrap(),
        ]);
        assert_eq!(forward.cache_component(), reversed.cache_component());
    }

    #[test]
    fn history_trims_oldest_but_count_keeps_growing() {
        let identity = ActingIdentity::new(
            ClientId::new("c1".into()).unwrap(),
            ActorId::new("a1".into()).unwrap(),
            ActorClassId::new("cl1".into()).unwrap(),
        );
        let mut session = Session::new(uuid::Uuid::new_v4(), identity, ChatMode::Agent);

        for i in 0..6 {
            session.push_message(ChatMessage::new(MessageRole::User, format!("m{i}")));
            session.trim_history(4);
        }

        assert_eq!(session.history.len(), 4);
        assert_eq!(session.message_count, 6);
        assert_eq!(session.history[0].content, "m2");
    }

    #[test]
    fn understanding_level_clamps_at_bounds() {
        let mut progress = LearningProgress::default();
        assert_eq!(progress.understanding_level, 3);

        for _ in 0..10 {
            progress.raise_level();
        }
        assert_eq!(progress.understanding_level, LearningProgress::MAX_LEVEL);

        for _ in 0..10 {
            progress.lower_level();
        }
        assert_eq!(progress.understanding_level, LearningProgress::MIN_LEVEL);
    }

    #[test]
    fn record_topic_caps_prior_topics() {
        let mut progress = LearningProgress::default();
        for i in 0..15 {
            progress.record_topic(format!("topic-{i}"));
        }
        assert_eq!(progress.topic.as_deref(), Some("topic-14"));
        assert_eq!(progress.prior_topics.len(), LearningProgress::MAX_PRIOR_TOPICS);
        assert_eq!(progress.prior_topics[0], "topic-4");
    }

    #[test]
    fn mode_state_swap_replaces_only_mode_substate() {
        let state = ModeState::for_mode(ChatMode::Tutor);
        assert_eq!(state.mode(), ChatMode::Tutor);
        let state = ModeState::for_mode(ChatMode::Agent);
        assert!(matches!(state, ModeState::Agent { ref outcomes } if outcomes.is_empty()));
    }
}
