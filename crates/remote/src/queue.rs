//! Queue backend seam.
//!
//! One fetch request yields a stream of [`FetchEvent`]s: zero or more
//! `Item`s followed by exactly one `Done`. An empty queue is observed
//! as a request that completes without delivering any items; there is
//! no explicit empty sentinel. Backend faults never surface as panics
//! or transport errors, only as values on the stream; the completion
//! is the sole error channel for the request itself.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::coordinate::Coordinate;

/// Error reported by the queue backend, either per-item or on
/// completion.
#[derive(Debug, Clone, thiserror::Error)]
#[error("backend error {code}: {message}")]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

/// One fetch-by-coordinate request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Backend address the request is issued against.
    pub coordinate: Coordinate,
    /// Tag the backend echoes (substituted) in replies; restored by
    /// the engine before items go downstream.
    pub source_key: u64,
    /// Pop event address, `"{queue_name}@{pop_event}"`.
    pub event: String,
    /// Number of items requested.
    pub count: u64,
    /// Replica groups the request fans out to.
    pub groups: Vec<u32>,
}

/// One item delivered for a fetch request.
#[derive(Debug, Clone)]
pub struct FetchReply {
    /// Source key as set by the backend. The backend replaces the
    /// request's key with an internal job id, so this usually differs
    /// from [`FetchRequest::source_key`].
    pub source_key: u64,
    /// Item payload; empty when the queue had nothing for this slot.
    pub payload: Vec<u8>,
    /// Per-reply backend error, if any.
    pub error: Option<BackendError>,
}

/// Event on a fetch request's reply stream.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// One delivered item (possibly carrying an error or an empty
    /// payload).
    Item(FetchReply),
    /// Terminal completion; fires exactly once per request.
    Done(Option<BackendError>),
}

/// The remote queue, reduced to the one call the engine needs.
///
/// Implementations fan the request out to the request's replica
/// groups and must eventually put a `Done` on the stream (or drop the
/// sender, which the engine treats the same way).
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> mpsc::Receiver<FetchEvent>;
}
