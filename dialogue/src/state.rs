//! The mode state machine.
//!
//! A single pure function over explicit state: `(state, event) ->
//! (new_state, effects)`. Transitions happen only on explicit events;
//! the engine never infers a mode change. A switch replaces exactly the
//! mode-specific sub-state; message history lives outside this machine
//! and is untouched.

use cq_core::types::{ChatMode, ComprehensionSignal, ModeState, TaskOutcome};

/// Outcome buffer bound; oldest entries drop first.
const MAX_TASK_OUTCOMES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum ModeEvent {
    /// Explicit user or API request to change modes.
    SwitchTo(ChatMode),
    /// Tutor only: the user committed to a learning topic.
    TopicChosen(String),
    /// Tutor only: comprehension report from the response generator.
    Signal(ComprehensionSignal),
    /// Agent only: a task-shaped request completed.
    TaskCompleted(TaskOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeEffect {
    ModeChanged { from: ChatMode, to: ChatMode },
    TopicSet { topic: String },
    LevelChanged { from: u8, to: u8 },
    OutcomeRecorded,
}

/// Apply one event. Events that don't apply to the current mode are
/// ignored rather than erroring: a stale tutor signal arriving after a
/// switch to agent must not corrupt agent state.
pub fn transition(state: ModeState, event: ModeEvent) -> (ModeState, Vec<ModeEffect>) {
    match (state, event) {
        (state, ModeEvent::SwitchTo(target)) => {
            let current = state.mode();
            if current == target {
                return (state, Vec::new());
            }
            (
                ModeState::for_mode(target),
                vec![ModeEffect::ModeChanged {
                    from: current,
                    to: target,
                }],
            )
        }

        (ModeState::Tutor { mut progress }, ModeEvent::TopicChosen(topic)) => {
            progress.record_topic(topic.clone());
            (
                ModeState::Tutor { progress },
                vec![ModeEffect::TopicSet { topic }],
            )
        }

        (ModeState::Tutor { mut progress }, ModeEvent::Signal(signal)) => {
            let before = progress.understanding_level;
            match signal {
                ComprehensionSignal::Comprehension => progress.raise_level(),
                ComprehensionSignal::Confusion => progress.lower_level(),
                ComprehensionSignal::Neutral => {}
            }
            let after = progress.understanding_level;
            let effects = if before == after {
                Vec::new()
            } else {
                vec![ModeEffect::LevelChanged {
                    from: before,
                    to: after,
                }]
            };
            (ModeState::Tutor { progress }, effects)
        }

        (ModeState::Agent { mut outcomes }, ModeEvent::TaskCompleted(outcome)) => {
            outcomes.push(outcome);
            if outcomes.len() > MAX_TASK_OUTCOMES {
                let excess = outcomes.len() - MAX_TASK_OUTCOMES;
                outcomes.drain(..excess);
            }
            (
                ModeState::Agent { outcomes },
                vec![ModeEffect::OutcomeRecorded],
            )
        }

        // Cross-mode events are no-ops.
        (state, _) => (state, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_core::types::LearningProgress;

    fn tutor_with_level(level: u8) -> ModeState {
        ModeState::Tutor {
            progress: LearningProgress {
                topic: Some("sql".to_string()),
                understanding_level: level,
                prior_topics: Vec::new(),
            },
        }
    }

    fn outcome(intent: &str) -> TaskOutcome {
        TaskOutcome {
            intent: intent.to_string(),
            action: None,
            entities: Vec::new(),
            procedures_followed: Vec::new(),
            completed_at: 0,
        }
    }

    #[test]
    fn switch_replaces_mode_substate() {
        let (state, effects) = transition(tutor_with_level(5), ModeEvent::SwitchTo(ChatMode::Agent));

        assert!(matches!(state, ModeState::Agent { ref outcomes } if outcomes.is_empty()));
        assert_eq!(
            effects,
            vec![ModeEffect::ModeChanged {
                from: ChatMode::Tutor,
                to: ChatMode::Agent
            }]
        );
    }

    #[test]
    fn switch_back_to_tutor_starts_fresh_progress() {
        let (state, _) = transition(tutor_with_level(5), ModeEvent::SwitchTo(ChatMode::Agent));
        let (state, _) = transition(state, ModeEvent::SwitchTo(ChatMode::Tutor));

        match state {
            ModeState::Tutor { progress } => {
                assert_eq!(progress.topic, None);
                assert_eq!(progress.understanding_level, LearningProgress::DEFAULT_LEVEL);
            }
            ModeState::Agent { .. } => panic!("expected tutor state"),
        }
    }

    #[test]
    fn switch_to_current_mode_is_a_no_op() {
        let before = tutor_with_level(4);
        let (after, effects) = transition(before.clone(), ModeEvent::SwitchTo(ChatMode::Tutor));
        assert_eq!(before, after);
        assert!(effects.is_empty());
    }

    #[test]
    fn comprehension_raises_and_confusion_lowers_with_clamping() {
        let (state, effects) = transition(
            tutor_with_level(3),
            ModeEvent::Signal(ComprehensionSignal::Comprehension),
        );
        assert_eq!(effects, vec![ModeEffect::LevelChanged { from: 3, to: 4 }]);

        let (state, _) = transition(state, ModeEvent::Signal(ComprehensionSignal::Comprehension));
        let (state, effects) =
            transition(state, ModeEvent::Signal(ComprehensionSignal::Comprehension));
        // Already at the ceiling: no effect emitted.
        assert!(effects.is_empty());

        let (_, effects) = transition(state, ModeEvent::Signal(ComprehensionSignal::Confusion));
        assert_eq!(effects, vec![ModeEffect::LevelChanged { from: 5, to: 4 }]);
    }

    #[test]
    fn tutor_events_do_not_leak_into_agent_state() {
        let agent = ModeState::for_mode(ChatMode::Agent);
        let (state, effects) = transition(
            agent.clone(),
            ModeEvent::Signal(ComprehensionSignal::Comprehension),
        );
        assert_eq!(state, agent);
        assert!(effects.is_empty());

        let (state, effects) =
            transition(agent.clone(), ModeEvent::TopicChosen("sql".to_string()));
        assert_eq!(state, agent);
        assert!(effects.is_empty());
    }

    #[test]
    fn task_outcomes_accumulate_and_cap() {
        let mut state = ModeState::for_mode(ChatMode::Agent);
        for i in 0..25 {
            let (next, effects) =
                transition(state, ModeEvent::TaskCompleted(outcome(&format!("t{i}"))));
            assert_eq!(effects, vec![ModeEffect::OutcomeRecorded]);
            state = next;
        }

        match state {
            ModeState::Agent { outcomes } => {
                assert_eq!(outcomes.len(), MAX_TASK_OUTCOMES);
                assert_eq!(outcomes[0].intent, "t5");
            }
            ModeState::Tutor { .. } => panic!("expected agent state"),
        }
    }

    #[test]
    fn topic_change_preserves_prior_topics() {
        let (state, _) = transition(
            ModeState::for_mode(ChatMode::Tutor),
            ModeEvent::TopicChosen("sql basics".to_string()),
        );
        let (state, _) = transition(state, ModeEvent::TopicChosen("query plans".to_string()));

        match state {
            ModeState::Tutor { progress } => {
                assert_eq!(progress.topic.as_deref(), Some("query plans"));
                assert_eq!(progress.prior_topics, vec!["sql basics".to_string()]);
            }
            ModeState::Agent { .. } => panic!("expected tutor state"),
        }
    }
}
