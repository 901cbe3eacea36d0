//! Dispatch unit bookkeeping.
//!
//! One unit exists per item handed to the worker service, from the
//! successful submit until the worker's close signal. Units live in
//! the engine's arena keyed by unit id, so they outlive the call that
//! created them without shared ownership across tasks.

/// State of one item in flight to the worker pool.
#[derive(Debug)]
pub struct DispatchUnit {
    /// Restored source key of the item, kept for log correlation.
    source_key: u64,
    /// Payload size at submission time.
    payload_len: usize,
    /// Number of errors the worker reported over the unit's lifetime.
    attempts: u32,
}

impl DispatchUnit {
    pub fn new(source_key: u64, payload_len: usize) -> Self {
        Self {
            source_key,
            payload_len,
            attempts: 0,
        }
    }

    pub fn source_key(&self) -> u64 {
        self.source_key
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one worker-reported error. Non-terminal; the unit still
    /// closes normally afterward.
    pub fn record_error(&mut self) {
        self.attempts += 1;
    }

    /// Terminal. Returns true when the worker reported no error across
    /// the unit's lifetime; such closes trigger resupply. Failed items
    /// are considered handled either way and are not requeued.
    pub fn close(self) -> bool {
        self.attempts == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_close_requests_resupply() {
        let unit = DispatchUnit::new(1, 16);
        assert!(unit.close());
    }

    #[test]
    fn errored_close_does_not_request_resupply() {
        let mut unit = DispatchUnit::new(1, 16);
        unit.record_error();
        assert!(!unit.close());
    }

    #[test]
    fn attempts_accumulate() {
        let mut unit = DispatchUnit::new(1, 16);
        assert_eq!(unit.attempts(), 0);
        unit.record_error();
        unit.record_error();
        assert_eq!(unit.attempts(), 2);
    }
}
