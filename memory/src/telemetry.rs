use cq_core::types::Realm;
use metrics::{counter, histogram};

/// Metrics recorder for the memory subsystem.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    _phantom: std::marker::PhantomData<()>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn record_realm_success(&self, realm: Realm, duration_ms: f64) {
        let labels = [
            ("realm", realm.to_string()),
            ("status", "success".to_string()),
        ];
        counter!("memory_realm_searches_total", &labels).increment(1);

        let histogram_labels = [("realm", realm.to_string())];
        histogram!("memory_realm_search_duration_seconds", &histogram_labels)
            .record(duration_ms / 1000.0);
    }

    pub fn record_realm_failure(&self, realm: Realm, reason: &str) {
        let labels = [
            ("realm", realm.to_string()),
            ("status", "failure".to_string()),
            ("reason", reason.to_string()),
        ];
        counter!("memory_realm_searches_total", &labels).increment(1);
    }

    pub fn record_cache_hit(&self) {
        let labels = [("outcome", "hit".to_string())];
        counter!("memory_result_cache_total", &labels).increment(1);
    }

    pub fn record_cache_miss(&self) {
        let labels = [("outcome", "miss".to_string())];
        counter!("memory_result_cache_total", &labels).increment(1);
    }

    pub fn record_resolution(&self, merged_count: usize, degraded: bool, duration_ms: f64) {
        let labels = [(
            "degraded",
            if degraded { "true" } else { "false" }.to_string(),
        )];
        counter!("memory_resolutions_total", &labels).increment(1);
        histogram!("memory_resolution_duration_seconds").record(duration_ms / 1000.0);
        histogram!("memory_resolution_entries").record(merged_count as f64);
    }

    pub fn record_upsert(&self, fact_count: usize, success: bool) {
        let labels = [(
            "status",
            if success { "success" } else { "failure" }.to_string(),
        )];
        counter!("memory_upserts_total", &labels).increment(1);
        if success {
            counter!("memory_upserted_facts_total").increment(fact_count as u64);
        }
    }
}
