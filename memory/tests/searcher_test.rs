//! Hierarchical searcher behavior against a programmable stub store.

use config::SearchConfig;
use cq_core::types::Realm;
use errors::MemoryError;
use memory::{HierarchicalSearcher, SearchQuery};
use std::sync::Arc;
use std::time::Duration;
use testing::{StubMemoryStore, memory_entry, test_identity};

fn searcher_with(store: Arc<StubMemoryStore>, config: SearchConfig) -> HierarchicalSearcher {
    HierarchicalSearcher::new(store, config)
}

fn short_timeout_config() -> SearchConfig {
    SearchConfig {
        per_realm_timeout_ms: 100,
        ..SearchConfig::default()
    }
}

#[tokio::test]
async fn client_realm_wins_semantic_key_conflict_with_skill_module() {
    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::Client,
        "C1",
        memory_entry("m-client", "vacation policy", "policy", Realm::Client, 0.4),
    );
    store.put(
        Realm::SkillModule,
        "SK1",
        memory_entry("m-skill", "vacation policy", "policy", Realm::SkillModule, 0.99),
    );

    let searcher = searcher_with(store, SearchConfig::default());
    let query = SearchQuery::new("vacation policy", test_identity())
        .with_realms(vec![Realm::Client, Realm::SkillModule]);

    let outcome = searcher.resolve(&query).await.unwrap();

    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].id, "m-client");
    assert_eq!(outcome.entries[0].realm, Realm::Client);
    assert_eq!(outcome.realms_accessed[&Realm::Client], 1);
    assert_eq!(outcome.realms_accessed[&Realm::SkillModule], 1);
}

#[tokio::test]
async fn failed_realm_degrades_without_failing_the_call() {
    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::Actor,
        "A1",
        memory_entry("m1", "expense report", "procedure", Realm::Actor, 0.8),
    );
    store.fail_realm(Realm::Client);

    let searcher = searcher_with(store, SearchConfig::default());
    let outcome = searcher
        .resolve(&SearchQuery::new("expenses", test_identity()))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert!(outcome.unavailable_realms.contains(&Realm::Client));
    assert_eq!(outcome.entries.len(), 1);
}

#[tokio::test]
async fn all_realms_failing_surfaces_memory_unavailable() {
    let store = Arc::new(StubMemoryStore::new());
    for realm in Realm::all() {
        store.fail_realm(realm);
    }

    let searcher = searcher_with(store, SearchConfig::default());
    let err = searcher
        .resolve(&SearchQuery::new("anything", test_identity()))
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::AllRealmsUnavailable { attempted: 4 }));
}

#[tokio::test]
async fn timed_out_realm_is_recorded_unavailable() {
    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::Actor,
        "A1",
        memory_entry("m1", "note", "fact", Realm::Actor, 0.5),
    );
    store.delay_realm(Realm::Client, Duration::from_millis(500));

    let searcher = searcher_with(store, short_timeout_config());
    let outcome = searcher
        .resolve(&SearchQuery::new("notes", test_identity()))
        .await
        .unwrap();

    assert!(outcome.unavailable_realms.contains(&Realm::Client));
    assert!(outcome.degraded);
    assert_eq!(outcome.entries.len(), 1);
}

#[tokio::test]
async fn all_realms_timing_out_is_also_memory_unavailable() {
    let store = Arc::new(StubMemoryStore::new());
    for realm in Realm::all() {
        store.put(
            realm,
            "ignored",
            memory_entry("m", "never seen", "fact", realm, 0.5),
        );
        store.delay_realm(realm, Duration::from_millis(500));
    }

    let searcher = searcher_with(store, short_timeout_config());
    let err = searcher
        .resolve(&SearchQuery::new("anything", test_identity()))
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::AllRealmsUnavailable { .. }));
}

#[tokio::test]
async fn cache_hit_bypasses_realm_calls_and_is_identical() {
    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::ActorClass,
        "CL1",
        memory_entry("m1", "sql basics", "concept", Realm::ActorClass, 0.7),
    );
    store.put(
        Realm::Client,
        "C1",
        memory_entry("m2", "style guide", "policy", Realm::Client, 0.6),
    );

    let searcher = searcher_with(Arc::clone(&store), SearchConfig::default());
    let query = SearchQuery::new("sql", test_identity());

    let first = searcher.resolve(&query).await.unwrap();
    let calls_after_first = store.search_calls();

    let second = searcher.resolve(&query).await.unwrap();

    assert_eq!(store.search_calls(), calls_after_first);
    assert!(second.from_cache);
    assert!(!first.from_cache);
    assert_eq!(first.entries, second.entries);
    assert_eq!(first.realms_accessed, second.realms_accessed);
}

#[tokio::test]
async fn actor_invalidation_forces_a_fresh_resolution() {
    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::Actor,
        "A1",
        memory_entry("m1", "project alpha", "fact", Realm::Actor, 0.9),
    );

    let searcher = searcher_with(Arc::clone(&store), SearchConfig::default());
    let query = SearchQuery::new("project", test_identity());

    searcher.resolve(&query).await.unwrap();
    let calls_before = store.search_calls();

    searcher.invalidate_actor("A1");
    searcher.resolve(&query).await.unwrap();

    assert!(store.search_calls() > calls_before);
}

#[tokio::test]
async fn each_subscribed_skill_module_is_searched() {
    let identity = test_identity().with_skill_modules(vec![
        cq_core::types::SkillModuleId::new("SK1".to_string()).unwrap(),
        cq_core::types::SkillModuleId::new("SK2".to_string()).unwrap(),
    ]);

    let store = Arc::new(StubMemoryStore::new());
    store.put(
        Realm::SkillModule,
        "SK1",
        memory_entry("m1", "email drafting", "procedure", Realm::SkillModule, 0.5),
    );
    store.put(
        Realm::SkillModule,
        "SK2",
        memory_entry("m2", "calendar booking", "procedure", Realm::SkillModule, 0.5),
    );

    let searcher = searcher_with(store, SearchConfig::default());
    let outcome = searcher
        .resolve(
            &SearchQuery::new("assist", identity).with_realms(vec![Realm::SkillModule]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.entries.len(), 2);
    assert_eq!(outcome.realms_accessed[&Realm::SkillModule], 2);
}

#[tokio::test]
async fn skill_module_realm_with_no_subscriptions_is_empty_not_an_outage() {
    let identity = test_identity().with_skill_modules(vec![]);
    let store = Arc::new(StubMemoryStore::new());

    let searcher = searcher_with(store, SearchConfig::default());
    let outcome = searcher
        .resolve(&SearchQuery::new("q", identity).with_realms(vec![Realm::SkillModule]))
        .await
        .unwrap();

    assert!(outcome.entries.is_empty());
    assert!(!outcome.degraded);
    assert!(outcome.unavailable_realms.is_empty());
}
