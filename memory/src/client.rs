//! HTTP client for the external long-term memory store.
//!
//! Thin request/response wrapper: retry and degradation policy belong to
//! the callers (the searcher absorbs failures per realm, the
//! consolidation pipeline retries upserts).

use async_trait::async_trait;
use config::MemoryServiceConfig;
use cq_core::traits::MemoryStore;
use cq_core::types::{FactUpsert, MemoryEntry, Realm, UpsertAck};
use errors::MemoryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct HttpMemoryClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct SearchRequestBody<'a> {
    realm: Realm,
    entity_id: &'a str,
    query: &'a str,
    max_results: usize,
    max_depth: u8,
}

#[derive(Debug, Deserialize)]
struct SearchResponseBody {
    entries: Vec<MemoryEntry>,
}

#[derive(Debug, Serialize)]
struct UpsertRequestBody<'a> {
    realm: Realm,
    entity_id: &'a str,
    facts: &'a [FactUpsert],
}

impl HttpMemoryClient {
    pub fn new(config: &MemoryServiceConfig) -> Result<Self, MemoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MemoryError::Connection {
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{}", self.base_url, path));
        if !self.api_token.is_empty() {
            builder = builder.bearer_auth(&self.api_token);
        }
        builder
    }

    async fn send<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, MemoryError> {
        let response = self
            .request(path)
            .json(body)
            .send()
            .await
            .map_err(|e| MemoryError::Connection {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(MemoryError::Http {
                status: status.as_u16(),
                reason,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MemoryError::InvalidResponse {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryClient {
    type Error = MemoryError;

    async fn search(
        &self,
        realm: Realm,
        entity_id: &str,
        query: &str,
        max_results: usize,
        max_depth: u8,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let body = SearchRequestBody {
            realm,
            entity_id,
            query,
            max_results,
            max_depth,
        };

        let response: SearchResponseBody = self.send("/memory/search", &body).await?;
        tracing::debug!(
            realm = %realm,
            entity_id = %entity_id,
            count = response.entries.len(),
            "memory search returned"
        );
        Ok(response.entries)
    }

    async fn upsert(
        &self,
        realm: Realm,
        entity_id: &str,
        facts: Vec<FactUpsert>,
    ) -> Result<UpsertAck, MemoryError> {
        let body = UpsertRequestBody {
            realm,
            entity_id,
            facts: &facts,
        };

        let ack: UpsertAck = self.send("/memory/entities/upsert", &body).await?;
        tracing::debug!(
            realm = %realm,
            entity_id = %entity_id,
            created = ack.created,
            updated = ack.updated,
            "memory upsert acknowledged"
        );
        Ok(ack)
    }
}
