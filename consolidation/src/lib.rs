//! # Colloquy Consolidation
//!
//! The asynchronous pipeline that folds conversation outcomes back into
//! long-term memory: explicit job records, a bounded queue drained by a
//! worker pool, fact extraction with success scoring, idempotent
//! ACTOR-realm upserts, and bounded retry with a dead-letter log line.
//! Failed jobs are never silently dropped.

pub mod extractor;
pub mod job;
pub mod pipeline;

pub use extractor::extract_facts;
pub use job::{ConsolidationJob, JobStatus};
pub use pipeline::{ConsolidationPipeline, PipelineStats, should_trigger};
