//! Correlation token for one fetch request.

use siphon_remote::Coordinate;

/// Immutable record created when a fetch request is issued, matching
/// asynchronous replies back to the request that caused them.
///
/// Held in an `Arc` by the reply forwarder and released once both the
/// item stream and the completion have been processed. The source key
/// is minted from a monotonically increasing sequence, so it is unique
/// among concurrently outstanding requests.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationToken {
    /// Backend address the request was issued against.
    pub coordinate: Coordinate,
    /// Original source key of the request.
    pub source_key: u64,
    /// Number of items the request asked for.
    pub count: u64,
}

impl CorrelationToken {
    pub fn new(coordinate: Coordinate, source_key: u64, count: u64) -> Self {
        Self {
            coordinate,
            source_key,
            count,
        }
    }
}
