//! Hierarchical memory searcher.
//!
//! Issues one search per (realm, entity-id) pair concurrently, applies
//! the fixed authority precedence during merge, and caches merged
//! results. Realm failures degrade locally; only a total outage is an
//! error.

use crate::result_cache::ResultCache;
use crate::telemetry::MemoryTelemetry;
use config::SearchConfig;
use cq_core::traits::MemoryStore;
use cq_core::types::{ActingIdentity, MemoryEntry, Realm};
use errors::MemoryError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub type SharedMemoryStore = Arc<dyn MemoryStore<Error = MemoryError> + Send + Sync>;

/// One resolution request: anchor text, acting identity, included realms.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub anchor: String,
    pub identity: ActingIdentity,
    pub realms: Vec<Realm>,
    pub max_depth: u8,
}

impl SearchQuery {
    pub fn new(anchor: impl Into<String>, identity: ActingIdentity) -> Self {
        Self {
            anchor: anchor.into(),
            identity,
            realms: Realm::all().to_vec(),
            max_depth: 2,
        }
    }

    pub fn with_realms(mut self, realms: Vec<Realm>) -> Self {
        self.realms = realms;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u8) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Merged, precedence-resolved result of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Entries ordered by (relevance desc, precedence desc, id asc).
    pub entries: Vec<MemoryEntry>,
    /// Pre-merge entry counts per realm.
    pub realms_accessed: HashMap<Realm, usize>,
    /// Realms that contributed nothing because every request to them
    /// failed or timed out.
    pub unavailable_realms: Vec<Realm>,
    pub relationships_traversed: u32,
    pub query_time_ms: u64,
    /// Set when any realm request failed; the result is still usable.
    pub degraded: bool,
    pub from_cache: bool,
}

impl SearchOutcome {
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.entity_name.as_str()).collect()
    }
}

pub struct HierarchicalSearcher {
    store: SharedMemoryStore,
    cache: ResultCache,
    telemetry: Arc<MemoryTelemetry>,
    config: SearchConfig,
}

impl HierarchicalSearcher {
    pub fn new(store: SharedMemoryStore, config: SearchConfig) -> Self {
        let cache = ResultCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        );
        Self {
            store,
            cache,
            telemetry: Arc::new(MemoryTelemetry::new()),
            config,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<MemoryTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Resolve applicable memory for `query`.
    ///
    /// Returns `AllRealmsUnavailable` only when at least one realm was
    /// actually queried and every request failed; the caller then falls
    /// back to a history-only response.
    pub async fn resolve(&self, query: &SearchQuery) -> Result<SearchOutcome, MemoryError> {
        let cache_key = utils::search_cache_key(
            &query.anchor,
            &query.identity,
            &query.realms,
            query.max_depth,
        );

        if let Some(mut cached) = self.cache.get(&cache_key) {
            self.telemetry.record_cache_hit();
            debug!(anchor = %truncate(&query.anchor, 50), "memory resolution cache hit");
            cached.from_cache = true;
            return Ok(cached);
        }
        self.telemetry.record_cache_miss();

        let started = Instant::now();
        let outcome = self.resolve_uncached(query, started).await?;

        self.cache.set(
            cache_key,
            query.identity.actor_id.to_string(),
            outcome.clone(),
        );
        self.telemetry.record_resolution(
            outcome.entries.len(),
            outcome.degraded,
            started.elapsed().as_millis() as f64,
        );

        Ok(outcome)
    }

    /// Drop cached resolutions for an actor after its realm was written.
    pub fn invalidate_actor(&self, actor_id: &str) {
        self.cache.invalidate_actor(actor_id);
    }

    async fn resolve_uncached(
        &self,
        query: &SearchQuery,
        started: Instant,
    ) -> Result<SearchOutcome, MemoryError> {
        let timeout = Duration::from_millis(self.config.per_realm_timeout_ms);
        let mut join_set = JoinSet::new();
        let mut attempted: HashMap<Realm, usize> = HashMap::new();

        for &realm in &query.realms {
            for entity_id in query.identity.entity_ids_for(realm) {
                *attempted.entry(realm).or_default() += 1;

                let store = Arc::clone(&self.store);
                let anchor = query.anchor.clone();
                let entity = entity_id.to_string();
                let max_results = self.config.max_results;
                let max_depth = query.max_depth;

                join_set.spawn(async move {
                    let request_started = Instant::now();
                    let result = tokio::time::timeout(
                        timeout,
                        store.search(realm, &entity, &anchor, max_results, max_depth),
                    )
                    .await;

                    let outcome = match result {
                        Ok(Ok(entries)) => Ok(entries),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                    };
                    (realm, entity, request_started.elapsed(), outcome)
                });
            }
        }

        if attempted.is_empty() {
            // Nothing to query (e.g. only SkillModule requested with no
            // subscriptions); an empty result, not an outage.
            return Ok(SearchOutcome {
                entries: Vec::new(),
                realms_accessed: HashMap::new(),
                unavailable_realms: Vec::new(),
                relationships_traversed: 0,
                query_time_ms: started.elapsed().as_millis() as u64,
                degraded: false,
                from_cache: false,
            });
        }

        let mut raw_entries: Vec<MemoryEntry> = Vec::new();
        let mut realms_accessed: HashMap<Realm, usize> = HashMap::new();
        let mut successes: HashMap<Realm, usize> = HashMap::new();
        let mut any_failure = false;

        while let Some(joined) = join_set.join_next().await {
            let Ok((realm, entity, elapsed, outcome)) = joined else {
                any_failure = true;
                continue;
            };

            match outcome {
                Ok(entries) => {
                    self.telemetry
                        .record_realm_success(realm, elapsed.as_millis() as f64);
                    *successes.entry(realm).or_default() += 1;
                    *realms_accessed.entry(realm).or_default() += entries.len();
                    for mut entry in entries {
                        // The realm scope of the request is authoritative
                        // over whatever the store echoed back.
                        entry.realm = realm;
                        raw_entries.push(entry);
                    }
                }
                Err(reason) => {
                    self.telemetry.record_realm_failure(realm, "error");
                    warn!(
                        realm = %realm,
                        entity_id = %entity,
                        reason = %reason,
                        "memory realm search failed"
                    );
                    any_failure = true;
                }
            }
        }

        let unavailable_realms: Vec<Realm> = attempted
            .keys()
            .filter(|realm| successes.get(realm).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        if unavailable_realms.len() == attempted.len() {
            return Err(MemoryError::AllRealmsUnavailable {
                attempted: attempted.len(),
            });
        }

        let entries = merge_with_precedence(raw_entries, self.config.max_results);
        let relationships_traversed = u32::from(query.max_depth) * entries.len() as u32;

        Ok(SearchOutcome {
            realms_accessed,
            degraded: any_failure || !unavailable_realms.is_empty(),
            unavailable_realms,
            relationships_traversed,
            query_time_ms: started.elapsed().as_millis() as u64,
            entries,
            from_cache: false,
        })
    }
}

/// Merge entries across realms.
///
/// Entries sharing a semantic key are the same logical fact: only the
/// highest-authority realm's version survives (relevance never overrides
/// authority). Within one realm, the more relevant duplicate wins, lowest
/// id on ties. Cross-group ordering is (relevance desc, precedence desc,
/// id asc); the trailing id comparison keeps the ordering total so
/// repeated resolutions are byte-identical.
fn merge_with_precedence(entries: Vec<MemoryEntry>, max_results: usize) -> Vec<MemoryEntry> {
    let mut by_key: HashMap<String, MemoryEntry> = HashMap::new();

    for entry in entries {
        let key = utils::semantic_key(&entry.entity_name, &entry.kind);
        match by_key.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut kept) => {
                let current = kept.get();
                let same_realm_wins = entry.realm == current.realm
                    && (entry.relevance > current.relevance
                        || (entry.relevance == current.relevance && entry.id < current.id));
                if entry.realm.dominates(current.realm) || same_realm_wins {
                    kept.insert(entry);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    let mut merged: Vec<MemoryEntry> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.realm.precedence().cmp(&a.realm.precedence()))
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(max_results);
    merged
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
