//! Prompt-context assembly shared by both mode processors.

use cq_core::types::MemoryEntry;

const MAX_CONTENT_SNIPPET: usize = 200;

/// Guidance string for a tutor understanding level (1-5).
pub fn level_guidance(level: u8) -> &'static str {
    match level {
        1 => "Explain in very simple terms with basic examples",
        2 => "Explain clearly with simple examples",
        3 => "Provide balanced explanation with examples",
        4 => "Include more detail and connections",
        _ => "Provide advanced explanation with nuances",
    }
}

/// Format resolved entries for the generator, one line per entry with a
/// bounded content snippet.
pub fn build_memory_context(entries: &[MemoryEntry], max_entries: usize) -> String {
    if entries.is_empty() {
        return "No specific knowledge available.".to_string();
    }

    entries
        .iter()
        .take(max_entries)
        .map(|entry| {
            let snippet: String = entry.content.chars().take(MAX_CONTENT_SNIPPET).collect();
            format!("- {}: {}", entry.entity_name, snippet)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format CLIENT-realm policy entries as hard overrides.
pub fn build_policy_context(policies: &[&MemoryEntry]) -> String {
    if policies.is_empty() {
        return "No specific policies apply.".to_string();
    }

    let mut parts = Vec::new();
    for policy in policies {
        parts.push(format!("Policy: {} (client override)", policy.entity_name));
        let snippet: String = policy.content.chars().take(MAX_CONTENT_SNIPPET).collect();
        parts.push(format!("  - {snippet}"));
    }
    parts.join("\n")
}
