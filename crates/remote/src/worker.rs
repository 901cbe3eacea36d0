//! Worker service seam.
//!
//! A successful submit hands one queue item to the worker pool and
//! returns a signal stream for the resulting dispatch: zero or more
//! `Progress`/`Error` signals, then exactly one `Close`. A submit may
//! also fail synchronously (pool unavailable, event rejected), in
//! which case no dispatch exists at all.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::coordinate::Coordinate;

/// A fetched queue item, as forwarded to the worker service.
///
/// Carries the originating request's coordinate and (restored) source
/// key so the worker's acknowledgement routes back to the queue
/// instance that produced the item.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub coordinate: Coordinate,
    pub source_key: u64,
    pub payload: Vec<u8>,
}

/// One item handed to the worker pool.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Worker event in `"app@event"` form.
    pub event: String,
    /// Soft timeout for the dispatch.
    pub timeout: Duration,
    /// Hard deadline for the dispatch.
    pub deadline: Duration,
    pub item: QueueItem,
}

/// Signal emitted by an in-flight dispatch.
#[derive(Debug, Clone)]
pub enum WorkerSignal {
    /// Acknowledgement/progress data from the worker; logged, not
    /// interpreted.
    Progress(Vec<u8>),
    /// Worker-reported error; non-terminal.
    Error { code: i32, message: String },
    /// Terminal; fires exactly once, after any other signals.
    Close,
}

/// Synchronous submission failure. No dispatch exists when this is
/// returned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("worker service unavailable: {0}")]
    Unavailable(String),

    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// The worker pool, reduced to the one call the engine needs.
#[async_trait]
pub trait WorkerService: Send + Sync {
    async fn submit(&self, dispatch: Dispatch) -> Result<mpsc::Receiver<WorkerSignal>, SubmitError>;
}
