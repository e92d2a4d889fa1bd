//! The consolidation pipeline: bounded queue, worker pool, bounded retry.

use crate::extractor::extract_facts;
use crate::job::{ConsolidationJob, JobStatus};
use config::ConsolidationConfig;
use cq_core::types::{ActorId, ChatMessage, ChatMode, Realm};
use dashmap::DashMap;
use errors::ConsolidationError;
use memory::searcher::SharedMemoryStore;
use memory::{HierarchicalSearcher, RetryConfig, with_retry};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Window check used by the engine after each persisted turn.
pub fn should_trigger(message_count: u64, consolidated_through: u64, window: u64) -> bool {
    message_count.saturating_sub(consolidated_through) >= window
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed_permanent: u64,
}

struct Inner {
    store: SharedMemoryStore,
    searcher: Option<Arc<HierarchicalSearcher>>,
    config: ConsolidationConfig,
    /// Terminal status per job, bounded by normal session churn; this is
    /// operational introspection, not a durable audit log.
    statuses: DashMap<Uuid, JobStatus>,
}

pub struct ConsolidationPipeline {
    tx: mpsc::Sender<ConsolidationJob>,
    inner: Arc<Inner>,
}

impl ConsolidationPipeline {
    /// Spawn the worker pool and return the submission handle.
    pub fn spawn(
        store: SharedMemoryStore,
        searcher: Option<Arc<HierarchicalSearcher>>,
        config: ConsolidationConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<ConsolidationJob>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let inner = Arc::new(Inner {
            store,
            searcher,
            config: config.clone(),
            statuses: DashMap::new(),
        });

        for worker_id in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    process_job(&inner, job, worker_id).await;
                }
            });
        }

        Arc::new(Self { tx, inner })
    }

    /// Fire-and-forget submission. A full queue drops the trigger with a
    /// warning; the next window re-covers the slice and upserts are
    /// idempotent, so nothing durable is lost.
    pub fn submit(
        &self,
        session_id: Uuid,
        actor_id: ActorId,
        mode: ChatMode,
        messages: Vec<ChatMessage>,
    ) -> Result<Uuid, ConsolidationError> {
        let job = ConsolidationJob::new(session_id, actor_id, mode, messages);
        let job_id = job.job_id;

        self.inner.statuses.insert(job_id, JobStatus::Pending);
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                self.inner.statuses.remove(&job.job_id);
                warn!(
                    session_id = %session_id,
                    "consolidation queue full, trigger dropped"
                );
                ConsolidationError::QueueFull {
                    session_id: session_id.to_string(),
                }
            }
            mpsc::error::TrySendError::Closed(_) => ConsolidationError::Shutdown,
        })?;

        counter!("consolidation_jobs_submitted_total").increment(1);
        Ok(job_id)
    }

    pub fn status_of(&self, job_id: Uuid) -> Option<JobStatus> {
        self.inner.statuses.get(&job_id).map(|s| *s.value())
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = PipelineStats::default();
        for entry in self.inner.statuses.iter() {
            stats.submitted += 1;
            match entry.value() {
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::FailedPermanent => stats.failed_permanent += 1,
                JobStatus::Pending => {}
            }
        }
        stats
    }
}

async fn process_job(inner: &Inner, mut job: ConsolidationJob, worker_id: usize) {
    let facts = extract_facts(&job.messages, inner.config.min_confidence);
    if facts.is_empty() {
        job.status = JobStatus::Succeeded;
        inner.statuses.insert(job.job_id, JobStatus::Succeeded);
        counter!("consolidation_jobs_completed_total").increment(1);
        return;
    }

    let actor_id = job.actor_id.as_str().to_string();
    let fact_count = facts.len();

    let result = with_retry(
        || {
            let facts = facts.clone();
            let actor_id = actor_id.clone();
            let store = Arc::clone(&inner.store);
            async move { store.upsert(Realm::Actor, &actor_id, facts).await }
        },
        RetryConfig::from(&inner.config),
        |e| e.is_retryable(),
    )
    .await;

    match result {
        Ok(ack) => {
            job.status = JobStatus::Succeeded;
            inner.statuses.insert(job.job_id, JobStatus::Succeeded);
            counter!("consolidation_jobs_completed_total").increment(1);
            counter!("consolidation_facts_total").increment(fact_count as u64);

            // New facts make cached merges for this actor stale.
            if let Some(searcher) = &inner.searcher {
                searcher.invalidate_actor(&actor_id);
            }

            info!(
                job_id = %job.job_id,
                session_id = %job.session_id,
                worker_id,
                created = ack.created,
                updated = ack.updated,
                "consolidation job succeeded"
            );
        }
        Err(e) => {
            job.retry_count = inner.config.max_retries;
            job.status = JobStatus::FailedPermanent;
            inner
                .statuses
                .insert(job.job_id, JobStatus::FailedPermanent);
            counter!("consolidation_jobs_failed_total").increment(1);

            // Full job context for manual replay; this line is the
            // dead-letter record.
            error!(
                job_id = %job.job_id,
                session_id = %job.session_id,
                actor_id = %job.actor_id,
                mode = %job.mode,
                message_count = job.messages.len(),
                fact_count,
                attempts = inner.config.max_retries + 1,
                error = %e,
                "consolidation job failed permanently"
            );
        }
    }
}
