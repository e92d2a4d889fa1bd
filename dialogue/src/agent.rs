//! Agent mode: passive, procedure-following turns.
//!
//! Resolves task-focused memory, applies CLIENT-realm policy entries as
//! hard overrides on response framing, and records an outcome when a
//! task-shaped request completes.

use crate::prompt::{build_memory_context, build_policy_context};
use crate::state::ModeEvent;
use crate::tutor::{AssembledTurn, SearchPlan};
use cq_core::traits::PromptContext;
use cq_core::types::{ChatMessage, MemoryEntry, Realm, TaskOutcome};
use regex::Regex;
use std::sync::OnceLock;

const MAX_PROCEDURES_IN_CONTEXT: usize = 3;
const MAX_CONTEXT_ENTRIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Procedure,
    Troubleshooting,
    Information,
    Creation,
    Search,
    General,
}

impl TaskKind {
    /// Task-shaped requests produce an outcome record on completion.
    pub fn is_task_shaped(&self) -> bool {
        matches!(
            self,
            TaskKind::Procedure | TaskKind::Troubleshooting | TaskKind::Creation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Procedure => "procedure",
            TaskKind::Troubleshooting => "troubleshooting",
            TaskKind::Information => "information",
            TaskKind::Creation => "creation",
            TaskKind::Search => "search",
            TaskKind::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub kind: TaskKind,
    pub action: Option<String>,
    pub entities: Vec<String>,
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("static regex"))
}

/// Keyword-level intent analysis, no model call involved.
pub fn analyze_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();

    let kind = if ["how to", "how do i", "steps to"].iter().any(|k| lower.contains(k)) {
        TaskKind::Procedure
    } else if ["fix", "error", "problem", "issue"].iter().any(|k| lower.contains(k)) {
        TaskKind::Troubleshooting
    } else if ["what is", "explain", "definition"].iter().any(|k| lower.contains(k)) {
        TaskKind::Information
    } else if ["create", "make", "build", "generate"].iter().any(|k| lower.contains(k)) {
        TaskKind::Creation
    } else if ["find", "search", "locate", "where"].iter().any(|k| lower.contains(k)) {
        TaskKind::Search
    } else {
        TaskKind::General
    };

    let action = ["create", "update", "delete", "find", "fix", "explain", "show", "list"]
        .iter()
        .find(|verb| lower.contains(*verb))
        .map(|verb| (*verb).to_string());

    let entities = quoted_re()
        .captures_iter(message)
        .map(|c| c[1].to_string())
        .collect();

    Intent {
        kind,
        action,
        entities,
    }
}

pub struct AgentProcessor;

impl AgentProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Task-focused query enrichment by intent.
    pub fn search_plan(&self, intent: &Intent, message: &str) -> SearchPlan {
        let anchor = match intent.kind {
            TaskKind::Procedure => format!("procedure steps: {message}"),
            TaskKind::Troubleshooting => format!("troubleshooting fix solution: {message}"),
            _ => message.to_string(),
        };
        SearchPlan {
            anchor,
            realms: Realm::all().to_vec(),
        }
    }

    pub fn assemble(
        &self,
        intent: &Intent,
        message: &str,
        entries: &[MemoryEntry],
        history: Vec<ChatMessage>,
    ) -> AssembledTurn {
        let policies: Vec<&MemoryEntry> = entries
            .iter()
            .filter(|e| e.realm == Realm::Client && e.is_policy())
            .collect();
        let procedures: Vec<&MemoryEntry> = entries
            .iter()
            .filter(|e| {
                let kind = e.kind.to_lowercase();
                ["procedure", "sop", "guide", "steps"].iter().any(|t| kind.contains(t))
            })
            .take(MAX_PROCEDURES_IN_CONTEXT)
            .collect();

        let ordered = task_order(entries);
        let memory_context = build_memory_context(&ordered, MAX_CONTEXT_ENTRIES);
        let policy_context = build_policy_context(&policies);

        let framing = match intent.kind {
            TaskKind::Procedure => {
                "Follow the available procedures exactly and provide step-by-step \
                 instructions. Be direct and actionable."
            }
            TaskKind::Troubleshooting => {
                "Provide troubleshooting steps from the available solutions. Be \
                 direct and systematic."
            }
            _ => "Provide a direct, helpful response. Do not speculate beyond the \
                  available information.",
        };

        // Policy context is restated after the framing: client policies win
        // over any conflicting memory content, regardless of relevance.
        let instructions = format!(
            "You are a task assistant acting only when asked. {framing}\n\
             Policies to apply (these override everything else):\n{policy_context}",
        );

        let mut events = Vec::new();
        if intent.kind.is_task_shaped() {
            events.push(ModeEvent::TaskCompleted(TaskOutcome {
                intent: intent.kind.as_str().to_string(),
                action: intent.action.clone(),
                entities: intent.entities.clone(),
                procedures_followed: procedures
                    .iter()
                    .map(|p| p.entity_name.clone())
                    .collect(),
                completed_at: chrono::Utc::now().timestamp(),
            }));
        }

        AssembledTurn {
            prompt: PromptContext {
                instructions,
                memory_context,
                history,
                user_message: message.to_string(),
            },
            follow_up_topics: Vec::new(),
            events,
            elicited_topic: false,
        }
    }
}

impl Default for AgentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Bias task realms to the front: skill-module procedures and client
/// policy first, merged order otherwise preserved.
fn task_order(entries: &[MemoryEntry]) -> Vec<MemoryEntry> {
    let (preferred, rest): (Vec<MemoryEntry>, Vec<MemoryEntry>) = entries
        .iter()
        .cloned()
        .partition(|e| matches!(e.realm, Realm::SkillModule | Realm::Client));
    preferred.into_iter().chain(rest).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(name: &str, kind: &str, realm: Realm) -> MemoryEntry {
        MemoryEntry {
            id: name.to_string(),
            entity_name: name.to_string(),
            content: format!("{name} content"),
            kind: kind.to_string(),
            realm,
            relevance: 0.5,
            hop_depth: 1,
            metadata: HashMap::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn intent_detects_task_kind_action_and_quoted_entities() {
        let intent = analyze_intent("How do I fix the \"deploy pipeline\" error?");

        assert_eq!(intent.kind, TaskKind::Procedure);
        assert_eq!(intent.action.as_deref(), Some("fix"));
        assert_eq!(intent.entities, vec!["deploy pipeline".to_string()]);
    }

    #[test]
    fn procedure_intent_enriches_the_anchor() {
        let intent = analyze_intent("steps to onboard a customer");
        let plan = AgentProcessor::new().search_plan(&intent, "steps to onboard a customer");
        assert!(plan.anchor.starts_with("procedure steps:"));
    }

    #[test]
    fn client_policies_land_in_instructions_as_overrides() {
        let entries = vec![
            entry("expense limits", "policy", Realm::Client),
            entry("booking guide", "procedure", Realm::SkillModule),
        ];
        let intent = analyze_intent("how do i book travel");

        let turn = AgentProcessor::new().assemble(&intent, "how do i book travel", &entries, Vec::new());

        assert!(turn.prompt.instructions.contains("expense limits"));
        assert!(turn.prompt.instructions.contains("override"));
    }

    #[test]
    fn non_client_policy_kinds_are_not_overrides() {
        let entries = vec![entry("local habit", "policy", Realm::Actor)];
        let intent = analyze_intent("anything");

        let turn = AgentProcessor::new().assemble(&intent, "anything", &entries, Vec::new());

        assert!(turn.prompt.instructions.contains("No specific policies apply."));
    }

    #[test]
    fn task_shaped_requests_record_an_outcome() {
        let entries = vec![entry("booking guide", "procedure", Realm::SkillModule)];
        let intent = analyze_intent("how do i book travel");

        let turn = AgentProcessor::new().assemble(&intent, "how do i book travel", &entries, Vec::new());

        assert_eq!(turn.events.len(), 1);
        match &turn.events[0] {
            ModeEvent::TaskCompleted(outcome) => {
                assert_eq!(outcome.intent, "procedure");
                assert_eq!(outcome.procedures_followed, vec!["booking guide".to_string()]);
            }
            other => panic!("expected TaskCompleted, got {other:?}"),
        }
    }

    #[test]
    fn informational_requests_record_nothing() {
        let intent = analyze_intent("what is our refund window");
        let turn = AgentProcessor::new().assemble(&intent, "what is our refund window", &[], Vec::new());
        assert!(turn.events.is_empty());
    }
}
