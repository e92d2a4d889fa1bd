//! Tutor mode: proactive, learning-progress-driven turns.
//!
//! With no topic set, the first obligation is to elicit a learning goal
//! rather than answer substantively. Once a topic exists, responses are
//! sized to the current understanding level and end with follow-up topic
//! suggestions.

use crate::prompt::{build_memory_context, level_guidance};
use crate::state::ModeEvent;
use config::TutorConfig;
use cq_core::traits::PromptContext;
use cq_core::types::{
    ChatMessage, ComprehensionSignal, LearningProgress, MemoryEntry, Realm,
};

/// What to search before the turn can be assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub anchor: String,
    pub realms: Vec<Realm>,
}

/// A fully assembled turn, ready for generation and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTurn {
    pub prompt: PromptContext,
    pub follow_up_topics: Vec<String>,
    pub events: Vec<ModeEvent>,
    /// Set when the turn only asks for a learning goal.
    pub elicited_topic: bool,
}

pub struct TutorProcessor {
    config: TutorConfig,
}

impl TutorProcessor {
    pub fn new(config: TutorConfig) -> Self {
        Self { config }
    }

    /// Educational query enrichment: an active topic anchors the search.
    pub fn search_plan(&self, progress: &LearningProgress, message: &str) -> SearchPlan {
        let anchor = match &progress.topic {
            Some(topic) => format!("{topic} tutorial guide: {message}"),
            None => message.to_string(),
        };
        SearchPlan {
            anchor,
            realms: Realm::all().to_vec(),
        }
    }

    pub fn assemble(
        &self,
        progress: &LearningProgress,
        message: &str,
        entries: &[MemoryEntry],
        signal: ComprehensionSignal,
        history: Vec<ChatMessage>,
    ) -> AssembledTurn {
        let topic = progress
            .topic
            .clone()
            .or_else(|| derive_objective(message));

        let Some(topic) = topic else {
            return self.elicitation_turn(message, history);
        };

        let mut events = Vec::new();
        if progress.topic.is_none() {
            events.push(ModeEvent::TopicChosen(topic.clone()));
        }
        events.push(ModeEvent::Signal(signal));

        let ordered = educational_order(entries);
        let memory_context = build_memory_context(&ordered, self.config.max_context_entries);
        let follow_up_topics = self.suggest_topics(&topic, progress, &ordered);

        let level = progress.understanding_level;
        let instructions = format!(
            "You are a helpful tutor. The learning objective is: {topic}\n\
             Learner understanding level: {level}/5\n\
             Guidance: {guidance}\n\
             Address the question at the appropriate level, build on the \
             learner's current understanding, use the knowledge context when \
             relevant, and encourage further exploration.",
            guidance = level_guidance(level),
        );

        AssembledTurn {
            prompt: PromptContext {
                instructions,
                memory_context,
                history,
                user_message: message.to_string(),
            },
            follow_up_topics,
            events,
            elicited_topic: false,
        }
    }

    fn elicitation_turn(&self, message: &str, history: Vec<ChatMessage>) -> AssembledTurn {
        AssembledTurn {
            prompt: PromptContext {
                instructions: "You are a helpful tutor. The learner has not chosen a \
                               learning goal yet. Do not answer substantively; warmly ask \
                               what they would like to learn and offer to help pick a topic."
                    .to_string(),
                memory_context: "No specific knowledge available.".to_string(),
                history,
                user_message: message.to_string(),
            },
            follow_up_topics: Vec::new(),
            events: Vec::new(),
            elicited_topic: true,
        }
    }

    /// 1-3 follow-up topics from memory relationships, plus a deeper cut
    /// of the current topic once the learner is past the midpoint.
    fn suggest_topics(
        &self,
        topic: &str,
        progress: &LearningProgress,
        entries: &[MemoryEntry],
    ) -> Vec<String> {
        let mut suggestions: Vec<String> = Vec::new();
        for entry in entries.iter().take(10) {
            suggestions.extend(entry.related_topics());
        }
        if progress.understanding_level >= 3 {
            suggestions.push(format!("Advanced {topic}"));
        }

        let mut seen = std::collections::HashSet::new();
        suggestions
            .into_iter()
            .filter(|s| s != topic && seen.insert(s.clone()))
            .take(self.config.max_follow_up_topics)
            .collect()
    }
}

/// Bias educational realms to the front without disturbing the merged
/// relevance order within each group.
fn educational_order(entries: &[MemoryEntry]) -> Vec<MemoryEntry> {
    let (preferred, rest): (Vec<MemoryEntry>, Vec<MemoryEntry>) = entries
        .iter()
        .cloned()
        .partition(|e| matches!(e.realm, Realm::ActorClass | Realm::SkillModule));
    preferred.into_iter().chain(rest).collect()
}

/// Derive a learning objective from a substantive message; `None` means
/// the message carries no topic (a greeting, an acknowledgement) and the
/// turn should elicit one.
fn derive_objective(message: &str) -> Option<String> {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();

    for (prefix, template) in [
        ("how do i ", "Learn to"),
        ("how to ", "Learn to"),
        ("what is ", "Understand"),
        ("what are ", "Understand"),
        ("why ", "Understand reasoning behind"),
        ("when should ", "Learn when to apply"),
        ("teach me ", "Learn"),
    ] {
        if lower.starts_with(prefix) {
            // Byte indices line up only on char boundaries; `get` covers
            // case-folding edge cases in non-ASCII prefixes.
            if let Some(rest) = trimmed.get(prefix.len()..) {
                let rest = rest.trim().trim_end_matches('?');
                if !rest.is_empty() {
                    return Some(format!("{template} {rest}"));
                }
            }
        }
    }

    if trimmed.split_whitespace().count() >= 4 {
        return Some(trimmed.trim_end_matches('?').to_string());
    }

    None
}
