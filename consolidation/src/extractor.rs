//! Fact extraction from conversation slices.
//!
//! Keyword-scored, no model call: an assistant turn followed by a user
//! reaction carrying success markers becomes a durable interaction
//! pattern. The semantic key is derived from the originating request, so
//! re-extracting an overlapping slice updates the same fact instead of
//! duplicating it.

use cq_core::types::{ChatMessage, FactUpsert, MessageRole};
use std::collections::HashMap;

const POSITIVE_FEEDBACK: [&str; 8] = [
    "thank you", "thanks", "perfect", "exactly", "that helps", "great", "understood", "got it",
];
const COMPLETION_MARKERS: [&str; 6] = ["solved", "fixed", "working", "done", "completed", "finished"];
const LEARNING_PROGRESS: [&str; 5] =
    ["i understand", "makes sense", "i see", "now i get it", "clear now"];

const BASE_SCORE: f32 = 0.3;
const ENTITY_NAME_MAX: usize = 60;
const CONTENT_SNIPPET_MAX: usize = 200;

/// Extract durable facts from an ordered message slice, keeping only
/// those scoring at or above `min_confidence`.
pub fn extract_facts(messages: &[ChatMessage], min_confidence: f32) -> Vec<FactUpsert> {
    let mut facts: Vec<FactUpsert> = Vec::new();

    // Walk request -> response -> reaction triples.
    for window in messages.windows(3) {
        let [request, response, reaction] = window else {
            continue;
        };
        if request.role != MessageRole::User
            || response.role != MessageRole::Assistant
            || reaction.role != MessageRole::User
        {
            continue;
        }

        let score = score_reaction(&reaction.content);
        if score < min_confidence {
            continue;
        }

        let entity_name = normalize_request(&request.content);
        if entity_name.is_empty() {
            continue;
        }

        let kind = "interaction_pattern".to_string();
        let response_snippet: String =
            response.content.chars().take(CONTENT_SNIPPET_MAX).collect();

        let mut metadata = HashMap::new();
        metadata.insert("success_score".to_string(), serde_json::json!(score));

        facts.push(FactUpsert {
            semantic_key: utils::semantic_key(&entity_name, &kind),
            entity_name,
            kind,
            content: format!("Request: {}\nApproach: {}", request.content, response_snippet),
            confidence: score,
            source_session: None,
            metadata,
        });
    }

    // Overlapping windows can re-derive the same key; keep the highest
    // confidence version.
    dedup_by_key(facts)
}

fn score_reaction(reaction: &str) -> f32 {
    let lower = reaction.to_lowercase();
    let mut score = BASE_SCORE;

    if POSITIVE_FEEDBACK.iter().any(|m| lower.contains(m)) {
        score += 0.4;
    }
    if COMPLETION_MARKERS.iter().any(|m| lower.contains(m)) {
        score += 0.4;
    }
    if LEARNING_PROGRESS.iter().any(|m| lower.contains(m)) {
        score += 0.3;
    }

    score.min(1.0)
}

fn normalize_request(request: &str) -> String {
    request
        .trim()
        .trim_end_matches(['?', '!', '.'])
        .chars()
        .take(ENTITY_NAME_MAX)
        .collect::<String>()
        .trim()
        .to_string()
}

fn dedup_by_key(facts: Vec<FactUpsert>) -> Vec<FactUpsert> {
    let mut by_key: HashMap<String, FactUpsert> = HashMap::new();
    for fact in facts {
        match by_key.entry(fact.semantic_key.clone()) {
            std::collections::hash_map::Entry::Occupied(mut kept) => {
                if fact.confidence > kept.get().confidence {
                    kept.insert(fact);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(fact);
            }
        }
    }
    let mut out: Vec<FactUpsert> = by_key.into_values().collect();
    out.sort_by(|a, b| a.semantic_key.cmp(&b.semantic_key));
    out
}
