//! End-to-end engine flows against stub collaborators and the in-memory
//! session backend.

use config::Config;
use consolidation::ConsolidationPipeline;
use context::{InMemoryBackend, SessionStore};
use cq_core::types::{ChatMode, Realm};
use dialogue::{ChatEngine, StreamEvent, TurnOutput, TurnRequest};
use errors::ChatErrorKind;
use memory::HierarchicalSearcher;
use std::sync::Arc;
use std::time::Duration;
use testing::{StubGenerator, StubMemoryStore, memory_entry, test_identity};
use uuid::Uuid;

struct Harness {
    engine: ChatEngine,
    store: Arc<SessionStore>,
    mem: Arc<StubMemoryStore>,
}

fn harness(generator: StubGenerator) -> Harness {
    harness_with(Config::default(), generator)
}

fn harness_with(config: Config, generator: StubGenerator) -> Harness {
    let mem = Arc::new(StubMemoryStore::new());
    let searcher = Arc::new(HierarchicalSearcher::new(
        mem.clone(),
        config.search.clone(),
    ));
    let store = Arc::new(SessionStore::new(
        Arc::new(InMemoryBackend::new()),
        config.session.clone(),
    ));
    let pipeline = ConsolidationPipeline::spawn(
        mem.clone(),
        Some(searcher.clone()),
        config.consolidation.clone(),
    );

    let engine = ChatEngine::new(
        store.clone(),
        searcher,
        Arc::new(generator),
        pipeline,
        config,
    );

    Harness { engine, store, mem }
}

fn complete(output: TurnOutput) -> dialogue::TurnResponse {
    match output {
        TurnOutput::Complete(response) => *response,
        TurnOutput::Streaming { .. } => panic!("expected complete response"),
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_history(store: &SessionStore, session_id: Uuid, len: usize) {
    for _ in 0..200 {
        if let Ok(session) = store.load(session_id).await {
            if session.history.len() == len {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {len} history entries");
}

async fn wait_for_watermark(store: &SessionStore, session_id: Uuid, watermark: u64) {
    for _ in 0..200 {
        if let Ok(session) = store.load(session_id).await {
            if session.consolidated_through == watermark {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for consolidation watermark {watermark}");
}

#[tokio::test]
async fn agent_turn_answers_and_persists_both_messages() {
    let h = harness(StubGenerator::with_response("Use the export button."));
    h.mem.put(
        Realm::SkillModule,
        "SK1",
        memory_entry("m-report", "report export", "procedure", Realm::SkillModule, 0.8),
    );

    let output = h
        .engine
        .submit_turn(TurnRequest::new(test_identity(), "how do i export reports"))
        .await
        .unwrap();
    let response = complete(output);

    assert_eq!(response.text, "Use the export button.");
    assert_eq!(response.mode, ChatMode::Agent);
    assert!(!response.memory_unavailable);
    assert_eq!(response.memory_context_used, vec!["report export".to_string()]);

    let session = h.store.load(response.session_id).await.unwrap();
    assert_eq!(session.history.len(), 2);
    assert_eq!(session.history[0].content, "how do i export reports");
    assert_eq!(session.history[1].content, "Use the export button.");
    assert_eq!(session.memory_snapshot.len(), 1);
}

#[tokio::test]
async fn tutor_greeting_elicits_goal_and_stays_topicless() {
    let h = harness(StubGenerator::with_response(
        "Happy to help! What would you like to learn today?",
    ));

    let response = complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "hi").with_mode(ChatMode::Tutor),
            )
            .await
            .unwrap(),
    );

    let summary = h.engine.get_session(response.session_id).await.unwrap();
    let learning = summary.learning.expect("tutor session carries progress");
    assert_eq!(learning.topic, None);
    assert_eq!(learning.understanding_level, 3);
    assert!(response.follow_up_topics.is_empty());
}

#[tokio::test]
async fn tutor_question_sets_topic_and_suggests_follow_ups() {
    let h = harness(StubGenerator::with_response("Indexes speed up lookups."));
    let mut entry = memory_entry("m-index", "index design", "concept", Realm::ActorClass, 0.9);
    entry.metadata.insert(
        "related_topics".to_string(),
        serde_json::json!(["compound indexes", "query plans"]),
    );
    h.mem.put(Realm::ActorClass, "CL1", entry);

    let first = complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "How do I optimize database queries?")
                    .with_mode(ChatMode::Tutor),
            )
            .await
            .unwrap(),
    );

    assert!(!first.follow_up_topics.is_empty());
    assert!(first.follow_up_topics.len() <= 3);

    let summary = h.engine.get_session(first.session_id).await.unwrap();
    assert_eq!(
        summary.learning.unwrap().topic.as_deref(),
        Some("Learn to optimize database queries")
    );
}

#[tokio::test]
async fn comprehension_reply_raises_the_understanding_level() {
    let h = harness(StubGenerator::with_response("Great, let's go deeper."));

    let first = complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "How do I tune slow queries?")
                    .with_mode(ChatMode::Tutor),
            )
            .await
            .unwrap(),
    );

    complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "that makes sense, what else?")
                    .with_session(first.session_id),
            )
            .await
            .unwrap(),
    );

    let summary = h.engine.get_session(first.session_id).await.unwrap();
    assert_eq!(summary.learning.unwrap().understanding_level, 4);
}

#[tokio::test]
async fn client_entry_shadows_skill_module_entry_with_same_semantic_key() {
    let h = harness(StubGenerator::with_response("30 days, per company policy."));
    h.mem.put(
        Realm::Client,
        "C1",
        memory_entry("m-vac-client", "vacation policy", "policy", Realm::Client, 0.4),
    );
    h.mem.put(
        Realm::SkillModule,
        "SK1",
        memory_entry("m-vac-skill", "vacation policy", "policy", Realm::SkillModule, 0.99),
    );

    let response = complete(
        h.engine
            .submit_turn(TurnRequest::new(test_identity(), "vacation policy"))
            .await
            .unwrap(),
    );

    assert_eq!(response.memory_context_used.len(), 1);
    let session = h.store.load(response.session_id).await.unwrap();
    assert_eq!(session.memory_snapshot.len(), 1);
    assert_eq!(session.memory_snapshot[0].realm, Realm::Client);
}

#[tokio::test]
async fn total_memory_outage_still_answers_from_history() {
    let h = harness(StubGenerator::with_response("Here's what I remember."));
    for realm in Realm::all() {
        h.mem.fail_realm(realm);
    }

    let response = complete(
        h.engine
            .submit_turn(TurnRequest::new(test_identity(), "what did we decide?"))
            .await
            .unwrap(),
    );

    assert_eq!(response.text, "Here's what I remember.");
    assert!(response.memory_unavailable);
    assert!(response.degraded);
    assert!(response.memory_context_used.is_empty());
}

#[tokio::test]
async fn mode_switch_preserves_history_and_clears_tutor_state() {
    let h = harness(StubGenerator::with_response("Let's explore that."));

    let response = complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "How do I tune queries?")
                    .with_mode(ChatMode::Tutor),
            )
            .await
            .unwrap(),
    );
    let session_id = response.session_id;

    let before = h.store.load(session_id).await.unwrap();
    assert_eq!(before.history.len(), 2);
    assert!(before.learning_progress().is_some());

    let switch = h.engine.switch_mode(session_id, ChatMode::Agent).await.unwrap();
    assert_eq!(switch.previous_mode, ChatMode::Tutor);
    assert_eq!(switch.new_mode, ChatMode::Agent);

    let after = h.store.load(session_id).await.unwrap();
    assert_eq!(after.history, before.history);
    assert!(after.learning_progress().is_none());
    assert!(after.task_outcomes().is_empty());
}

#[tokio::test]
async fn switch_mode_on_unknown_session_is_session_not_found() {
    let h = harness(StubGenerator::with_response("n/a"));
    let err = h
        .engine
        .switch_mode(Uuid::new_v4(), ChatMode::Tutor)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::SessionNotFound);
}

#[tokio::test]
async fn streamed_chunks_concatenate_to_the_non_streamed_response() {
    let text = "First sentence. Second sentence. And a tail";
    let h = harness(StubGenerator::with_response(text));

    let output = h
        .engine
        .submit_turn(TurnRequest::new(test_identity(), "tell me things").with_streaming())
        .await
        .unwrap();

    let TurnOutput::Streaming { session_id, stream, .. } = output else {
        panic!("expected streaming output");
    };

    let (streamed, completed) = stream.collect_text().await;
    assert!(completed);
    assert_eq!(streamed, text);

    wait_for_history(&h.store, session_id, 2).await;

    let session = h.store.load(session_id).await.unwrap();
    assert_eq!(session.history[1].content, text);
}

#[tokio::test]
async fn cancelled_stream_still_persists_a_partial_turn() {
    let generator = StubGenerator::with_response("unused")
        .with_chunks(vec![
            "First part. ".to_string(),
            "Second part. ".to_string(),
            "Third part. ".to_string(),
        ])
        .with_chunk_delay(Duration::from_millis(40));
    let h = harness(generator);

    let output = h
        .engine
        .submit_turn(TurnRequest::new(test_identity(), "stream this").with_streaming())
        .await
        .unwrap();

    let TurnOutput::Streaming { session_id, mut stream, .. } = output else {
        panic!("expected streaming output");
    };

    // Read metadata plus the first chunk, then walk away.
    let mut seen_chunk = false;
    while let Some(event) = stream.recv().await {
        if matches!(event, StreamEvent::Chunk(_)) {
            seen_chunk = true;
            break;
        }
    }
    assert!(seen_chunk);
    drop(stream);

    wait_for_history(&h.store, session_id, 2).await;

    let session = h.store.load(session_id).await.unwrap();
    let partial = &session.history[1].content;
    assert!(partial.starts_with("First part. "));
    assert!(partial.len() < "First part. Second part. Third part. ".len());
}

#[tokio::test]
async fn stream_setup_failure_falls_back_to_a_complete_response() {
    let h = harness(StubGenerator::with_response("Fallback answer.").with_stream_failure());

    let output = h
        .engine
        .submit_turn(TurnRequest::new(test_identity(), "anything").with_streaming())
        .await
        .unwrap();

    let response = complete(output);
    assert_eq!(response.text, "Fallback answer.");
}

#[tokio::test]
async fn consolidation_window_folds_the_slice_into_the_actor_realm() {
    let mut config = Config::default();
    config.consolidation.window_messages = 4;
    config.consolidation.initial_backoff_ms = 1;
    let h = harness_with(config, StubGenerator::with_response("Use the reporting tab."));

    let first = complete(
        h.engine
            .submit_turn(TurnRequest::new(
                test_identity(),
                "How do I export the quarterly report?",
            ))
            .await
            .unwrap(),
    );
    let session_id = first.session_id;

    complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "perfect, that helps, done")
                    .with_session(session_id),
            )
            .await
            .unwrap(),
    );

    let mem = h.mem.clone();
    wait_until("consolidation upsert", || !mem.upserts().is_empty()).await;

    let upserts = h.mem.upserts();
    let (realm, entity, facts) = &upserts[0];
    assert_eq!(*realm, Realm::Actor);
    assert_eq!(entity, "A1");
    assert!(!facts.is_empty());

    wait_for_watermark(&h.store, session_id, 4).await;
}

#[tokio::test]
async fn delete_session_runs_a_final_consolidation() {
    let h = harness(StubGenerator::with_response("Open the admin console."));

    let first = complete(
        h.engine
            .submit_turn(TurnRequest::new(test_identity(), "How do I rotate the keys?"))
            .await
            .unwrap(),
    );
    let session_id = first.session_id;

    complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "thanks, that's fixed now")
                    .with_session(session_id),
            )
            .await
            .unwrap(),
    );

    assert!(h.engine.delete_session(session_id).await.unwrap());
    assert!(!h.engine.delete_session(session_id).await.unwrap());

    let mem = h.mem.clone();
    wait_until("final consolidation upsert", || !mem.upserts().is_empty()).await;

    let err = h.engine.get_session(session_id).await.unwrap_err();
    assert_eq!(err.kind(), ChatErrorKind::SessionNotFound);
}

#[tokio::test]
async fn requested_mode_overrides_stored_mode_with_a_switch() {
    let h = harness(StubGenerator::with_response("ok"));

    let first = complete(
        h.engine
            .submit_turn(TurnRequest::new(test_identity(), "hello there my friend"))
            .await
            .unwrap(),
    );
    assert_eq!(first.mode, ChatMode::Agent);

    let second = complete(
        h.engine
            .submit_turn(
                TurnRequest::new(test_identity(), "teach me sql")
                    .with_session(first.session_id)
                    .with_mode(ChatMode::Tutor),
            )
            .await
            .unwrap(),
    );
    assert_eq!(second.mode, ChatMode::Tutor);

    let session = h.store.load(first.session_id).await.unwrap();
    assert_eq!(session.mode(), ChatMode::Tutor);
    // History from the agent portion of the conversation is intact.
    assert_eq!(session.history.len(), 4);
}
