//! Streaming response pipeline.
//!
//! One producer task per in-flight turn feeds a bounded channel of
//! ordered events: metadata, chunks, then exactly one terminator
//! (`Complete`, preceded by `Error` on failure). A stalled generator is
//! terminated with an error event instead of hanging the consumer; a
//! disconnected consumer stops the producer, and the partially received
//! text is still recorded in history by the caller.

use cq_core::traits::GenerationChunk;
use cq_core::types::{ChatMode, Realm};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First event of every stream.
    Metadata {
        session_id: Uuid,
        message_id: Uuid,
        mode: ChatMode,
        realms_accessed: HashMap<Realm, usize>,
        degraded: bool,
        memory_query_time_ms: u64,
    },
    Chunk(GenerationChunk),
    /// Emitted before `Complete` when the stream failed mid-flight.
    Error { kind: String, message: String },
    /// Terminator; always the last event the producer sends.
    Complete {
        total_chunks: usize,
        follow_up_topics: Vec<String>,
    },
}

/// Consumer half of one turn's stream.
pub struct ResponseStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl ResponseStream {
    pub(crate) fn new(receiver: mpsc::Receiver<StreamEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Drain the stream, returning concatenated chunk text and whether a
    /// clean `Complete` terminator was seen.
    pub async fn collect_text(mut self) -> (String, bool) {
        let mut text = String::new();
        let mut completed = false;
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Chunk(chunk) => text.push_str(&chunk.content),
                StreamEvent::Complete { .. } => completed = true,
                StreamEvent::Metadata { .. } | StreamEvent::Error { .. } => {}
            }
        }
        (text, completed)
    }
}

/// What the producer saw, used by the caller to persist the turn.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProducerOutcome {
    /// All text received from the generator, delivered or not.
    pub text: String,
    pub chunks_delivered: usize,
    pub cancelled: bool,
    pub errored: bool,
}

/// Pump a generator stream into the event channel.
///
/// Chunk boundaries are re-drawn at sentence breaks (bounded by
/// `chunk_max_chars`); concatenated chunks always equal the generator's
/// full output for the turn.
pub(crate) async fn pump_stream<E: std::fmt::Display>(
    mut source: BoxStream<'static, Result<String, E>>,
    tx: &mpsc::Sender<StreamEvent>,
    stall_timeout: Duration,
    chunk_max_chars: usize,
    follow_up_topics: Vec<String>,
) -> ProducerOutcome {
    let mut text = String::new();
    let mut pending = String::new();
    let mut delivered = 0usize;
    let mut cancelled = false;
    let mut errored = false;

    'produce: loop {
        match tokio::time::timeout(stall_timeout, source.next()).await {
            Err(_) => {
                errored = true;
                warn!(stall_ms = stall_timeout.as_millis() as u64, "generator stalled");
                let _ = tx
                    .send(StreamEvent::Error {
                        kind: "generation_timeout".to_string(),
                        message: format!(
                            "generation stalled beyond {}ms",
                            stall_timeout.as_millis()
                        ),
                    })
                    .await;
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                errored = true;
                let _ = tx
                    .send(StreamEvent::Error {
                        kind: "generator_error".to_string(),
                        message: e.to_string(),
                    })
                    .await;
                break;
            }
            Ok(Some(Ok(piece))) => {
                text.push_str(&piece);
                pending.push_str(&piece);

                while let Some(cut) = ready_boundary(&pending, chunk_max_chars) {
                    let content: String = pending.drain(..cut).collect();
                    if send_chunk(tx, delivered, content).await.is_err() {
                        cancelled = true;
                        break 'produce;
                    }
                    delivered += 1;
                }
            }
        }
    }

    // Flush the tail on a clean end of stream.
    if !cancelled && !errored && !pending.is_empty() {
        if send_chunk(tx, delivered, std::mem::take(&mut pending)).await.is_err() {
            cancelled = true;
        } else {
            delivered += 1;
        }
    }

    if !cancelled {
        let _ = tx
            .send(StreamEvent::Complete {
                total_chunks: delivered,
                follow_up_topics,
            })
            .await;
    } else {
        debug!(chunks_delivered = delivered, "stream consumer disconnected");
    }

    ProducerOutcome {
        text,
        chunks_delivered: delivered,
        cancelled,
        errored,
    }
}

async fn send_chunk(
    tx: &mpsc::Sender<StreamEvent>,
    index: usize,
    content: String,
) -> Result<(), mpsc::error::SendError<StreamEvent>> {
    tx.send(StreamEvent::Chunk(GenerationChunk { index, content })).await
}

/// Byte offset to flush through, or `None` to keep buffering.
/// Prefers a sentence break, then a word break near the size bound.
fn ready_boundary(pending: &str, chunk_max_chars: usize) -> Option<usize> {
    if let Some(pos) = pending.find(". ") {
        return Some(pos + 2);
    }

    if pending.chars().count() >= chunk_max_chars {
        let hard_cut = pending
            .char_indices()
            .nth(chunk_max_chars)
            .map_or(pending.len(), |(idx, _)| idx);
        let cut = pending[..hard_cut]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(hard_cut);
        return Some(cut.max(1));
    }

    None
}
