//! Programmable stub collaborators.

use async_trait::async_trait;
use cq_core::traits::{GenerationOutput, MemoryStore, PromptContext, ResponseGenerator};
use cq_core::types::{
    ActingIdentity, ActorClassId, ActorId, ClientId, ComprehensionSignal, FactUpsert, MemoryEntry,
    Realm, SkillModuleId, UpsertAck,
};
use dashmap::DashMap;
use errors::MemoryError;
use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Standard identity used across engine tests.
pub fn test_identity() -> ActingIdentity {
    ActingIdentity::new(
        ClientId::new("C1".to_string()).unwrap(),
        ActorId::new("A1".to_string()).unwrap(),
        ActorClassId::new("CL1".to_string()).unwrap(),
    )
    .with_skill_modules(vec![SkillModuleId::new("SK1".to_string()).unwrap()])
}

pub fn memory_entry(
    id: &str,
    entity_name: &str,
    kind: &str,
    realm: Realm,
    relevance: f32,
) -> MemoryEntry {
    MemoryEntry {
        id: id.to_string(),
        entity_name: entity_name.to_string(),
        content: format!("{entity_name}: stub content"),
        kind: kind.to_string(),
        realm,
        relevance,
        hop_depth: 1,
        metadata: HashMap::new(),
        created_at: 0,
        updated_at: 0,
    }
}

/// In-process memory store with per-realm entries, failure and delay
/// injection, and upsert capture.
#[derive(Default)]
pub struct StubMemoryStore {
    entries: DashMap<(Realm, String), Vec<MemoryEntry>>,
    failing_realms: DashMap<Realm, ()>,
    realm_delays: DashMap<Realm, Duration>,
    search_calls: AtomicUsize,
    upsert_failures_remaining: AtomicU32,
    upserts: Mutex<Vec<(Realm, String, Vec<FactUpsert>)>>,
}

impl StubMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, realm: Realm, entity_id: &str, entry: MemoryEntry) {
        self.entries
            .entry((realm, entity_id.to_string()))
            .or_default()
            .push(entry);
    }

    /// Every search against `realm` fails until cleared.
    pub fn fail_realm(&self, realm: Realm) {
        self.failing_realms.insert(realm, ());
    }

    pub fn clear_failures(&self) {
        self.failing_realms.clear();
    }

    /// Delay searches against `realm`; combine with a short searcher
    /// timeout to simulate a realm timing out.
    pub fn delay_realm(&self, realm: Realm, delay: Duration) {
        self.realm_delays.insert(realm, delay);
    }

    /// The next `count` upserts fail with a retryable error.
    pub fn fail_next_upserts(&self, count: u32) {
        self.upsert_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> Vec<(Realm, String, Vec<FactUpsert>)> {
        self.upserts.lock().clone()
    }

    /// Distinct semantic keys ever upserted, with the latest content.
    pub fn upserted_facts(&self) -> HashMap<String, FactUpsert> {
        let mut facts = HashMap::new();
        for (_, _, batch) in self.upserts.lock().iter() {
            for fact in batch {
                facts.insert(fact.semantic_key.clone(), fact.clone());
            }
        }
        facts
    }
}

#[async_trait]
impl MemoryStore for StubMemoryStore {
    type Error = MemoryError;

    async fn search(
        &self,
        realm: Realm,
        entity_id: &str,
        _query: &str,
        max_results: usize,
        _max_depth: u8,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.realm_delays.get(&realm).map(|d| *d.value()) {
            tokio::time::sleep(delay).await;
        }

        if self.failing_realms.contains_key(&realm) {
            return Err(MemoryError::Provider {
                realm: realm.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let mut results = self
            .entries
            .get(&(realm, entity_id.to_string()))
            .map(|e| e.clone())
            .unwrap_or_default();
        results.truncate(max_results);
        Ok(results)
    }

    async fn upsert(
        &self,
        realm: Realm,
        entity_id: &str,
        facts: Vec<FactUpsert>,
    ) -> Result<UpsertAck, MemoryError> {
        let remaining = self.upsert_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.upsert_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(MemoryError::Connection {
                reason: "injected upsert failure".to_string(),
            });
        }

        let mut known: HashMap<String, FactUpsert> = self.upserted_facts();
        let mut created = 0;
        let mut updated = 0;
        for fact in &facts {
            if known.insert(fact.semantic_key.clone(), fact.clone()).is_some() {
                updated += 1;
            } else {
                created += 1;
            }
        }

        self.upserts
            .lock()
            .push((realm, entity_id.to_string(), facts));
        Ok(UpsertAck { created, updated })
    }
}

/// Scripted response generator.
///
/// `assess_comprehension` carries the simple phrase heuristics the
/// production generator reports; tests can also pin a fixed signal.
pub struct StubGenerator {
    response: String,
    stream_chunks: Mutex<Option<Vec<String>>>,
    stall: Option<Duration>,
    chunk_delay: Option<Duration>,
    fail_stream: bool,
    forced_signal: Option<ComprehensionSignal>,
    generate_calls: AtomicUsize,
}

impl StubGenerator {
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            stream_chunks: Mutex::new(None),
            stall: None,
            chunk_delay: None,
            fail_stream: false,
            forced_signal: None,
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Override the streamed chunks (default: whitespace-split response).
    pub fn with_chunks(self, chunks: Vec<String>) -> Self {
        *self.stream_chunks.lock() = Some(chunks);
        self
    }

    /// Sleep before the first chunk, to trip the pipeline stall timeout.
    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    /// Sleep before every chunk; makes mid-stream cancellation
    /// deterministic in tests.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn with_stream_failure(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn with_signal(mut self, signal: ComprehensionSignal) -> Self {
        self.forced_signal = Some(signal);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn chunks(&self) -> Vec<String> {
        self.stream_chunks.lock().clone().unwrap_or_else(|| {
            self.response
                .split_inclusive(' ')
                .map(str::to_string)
                .collect()
        })
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
impl ResponseGenerator for StubGenerator {
    type Error = BoxError;

    async fn generate(&self, _ctx: &PromptContext) -> Result<GenerationOutput, BoxError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationOutput {
            text: self.response.clone(),
        })
    }

    async fn generate_stream(
        &self,
        _ctx: &PromptContext,
    ) -> Result<BoxStream<'static, Result<String, BoxError>>, BoxError> {
        if self.fail_stream {
            return Err("injected stream failure".into());
        }

        let chunks = self.chunks();
        let stall = self.stall;
        let chunk_delay = self.chunk_delay;
        let stream = futures_util::stream::unfold(
            (chunks.into_iter(), stall),
            move |(mut iter, stall)| async move {
                if let Some(delay) = stall {
                    tokio::time::sleep(delay).await;
                }
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                iter.next()
                    .map(|chunk| (Ok::<String, BoxError>(chunk), (iter, None)))
            },
        );
        Ok(Box::pin(stream))
    }

    fn assess_comprehension(&self, user_message: &str) -> ComprehensionSignal {
        if let Some(signal) = self.forced_signal {
            return signal;
        }

        let message = user_message.to_lowercase();
        const CONFUSION: [&str; 5] = [
            "i don't understand",
            "confused",
            "what does that mean",
            "i'm lost",
            "too complex",
        ];
        const COMPREHENSION: [&str; 5] = [
            "i see",
            "that makes sense",
            "i understand",
            "got it",
            "now i get it",
        ];

        if CONFUSION.iter().any(|phrase| message.contains(phrase)) {
            ComprehensionSignal::Confusion
        } else if COMPREHENSION.iter().any(|phrase| message.contains(phrase)) {
            ComprehensionSignal::Comprehension
        } else {
            ComprehensionSignal::Neutral
        }
    }
}
