//! Status snapshot for external monitoring.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of one dispatcher instance.
///
/// Published by the engine after every state change; reading it never
/// touches engine state. The outstanding length is the capacity
/// signal: in-flight fetch requests and in-flight dispatch units share
/// one budget, and the split is exposed so the accounting is
/// auditable.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    /// Name of the source queue.
    pub queue_name: String,

    /// Total in-flight work, `fetches_in_flight + units_in_flight`.
    pub outstanding: u64,
    /// Fetch requests issued but not yet completed.
    pub fetches_in_flight: u64,
    /// Dispatch units not yet closed.
    pub units_in_flight: u64,
    /// Fixed outstanding-work budget.
    pub max_outstanding: u64,

    /// Smoothed rate of items delivered by the queue (per second).
    pub pop_rate: f64,
    /// Smoothed rate of items handed to the worker pool (per second).
    pub push_rate: f64,

    /// Items with a non-empty payload delivered by the queue.
    pub items_delivered: u64,
    /// Items successfully handed to the worker pool.
    pub items_dispatched: u64,
    /// Items lost to synchronous submit failures.
    pub items_dropped: u64,
    /// Worker-reported errors across all units.
    pub worker_errors: u64,

    /// When this dispatcher instance started.
    pub started_at: DateTime<Utc>,
}
