//! In-process TTL cache for merged resolution results.
//!
//! Keyed by the search-cache hash (query, identity, realm set, depth).
//! A hit bypasses every per-realm call and returns the stored outcome
//! unchanged, so hit and miss paths produce identical entry lists.
//! Entries for an actor are dropped when the consolidation pipeline
//! writes to that actor's realm.

use crate::searcher::SearchOutcome;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CachedResolution {
    outcome: SearchOutcome,
    actor_id: String,
    inserted_at: Instant,
}

pub struct ResultCache {
    entries: DashMap<String, CachedResolution>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<SearchOutcome> {
        let expired = match self.entries.get(key) {
            Some(cached) => {
                if cached.inserted_at.elapsed() < self.ttl {
                    return Some(cached.outcome.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: String, actor_id: String, outcome: SearchOutcome) {
        self.entries.insert(
            key,
            CachedResolution {
                outcome,
                actor_id,
                inserted_at: Instant::now(),
            },
        );

        // Past capacity, drop the oldest entry.
        if self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            if let Some(oldest_key) = oldest {
                self.entries.remove(&oldest_key);
            }
        }
    }

    /// Drop every cached resolution for `actor_id`. Called after an
    /// ACTOR-realm write so stale merges never outlive new facts.
    pub fn invalidate_actor(&self, actor_id: &str) {
        self.entries.retain(|_, cached| cached.actor_id != actor_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
