//! Exponentially-weighted moving average of event frequency.
//!
//! Each call to [`RateStat::update`] marks one event; the statistic
//! tracks how many events per second have been arriving lately. Used
//! only for the status snapshot (pop/push rates), never for control
//! decisions.

use std::time::Instant;

/// Floor on the measured gap between events, to keep the instantaneous
/// frequency finite when two updates land on the same clock reading.
const MIN_ELAPSED_SECS: f64 = 1e-6;

/// EWMA event-frequency statistic.
///
/// The smoothing factor adapts to the gap between events: gaps of a
/// second or more replace the average outright, shorter gaps blend
/// proportionally.
#[derive(Debug, Clone)]
pub struct RateStat {
    last_update: Instant,
    avg: f64,
}

impl RateStat {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            avg: 0.0,
        }
    }

    /// Record one event at the current instant.
    pub fn update(&mut self) {
        let now = Instant::now();
        let elapsed = now
            .duration_since(self.last_update)
            .as_secs_f64()
            .max(MIN_ELAPSED_SECS);
        let alpha = elapsed.min(1.0);
        self.avg = alpha * (1.0 / elapsed) + (1.0 - alpha) * self.avg;
        self.last_update = now;
    }

    /// Current smoothed frequency in events per second.
    pub fn rate(&self) -> f64 {
        self.avg
    }
}

impl Default for RateStat {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_at_zero() {
        assert_eq!(RateStat::new().rate(), 0.0);
    }

    #[test]
    fn update_produces_finite_rate() {
        let mut stat = RateStat::new();
        stat.update();
        stat.update();
        assert!(stat.rate().is_finite());
        assert!(stat.rate() >= 0.0);
    }

    #[test]
    fn back_to_back_updates_do_not_overflow() {
        let mut stat = RateStat::new();
        for _ in 0..1000 {
            stat.update();
        }
        assert!(stat.rate().is_finite());
    }

    #[test]
    fn slow_events_yield_low_rate() {
        let mut stat = RateStat::new();
        std::thread::sleep(Duration::from_millis(50));
        stat.update();
        std::thread::sleep(Duration::from_millis(50));
        stat.update();
        // Two events ~50ms apart: the instantaneous frequency is ~20/s
        // and the blended average must stay in that neighborhood.
        assert!(stat.rate() > 1.0);
        assert!(stat.rate() < 100.0);
    }

    #[test]
    fn long_gap_replaces_average() {
        let mut stat = RateStat::new();
        for _ in 0..10 {
            stat.update();
        }
        // A gap over one second uses alpha == 1.0, so the old (large)
        // average is discarded entirely.
        std::thread::sleep(Duration::from_millis(1100));
        stat.update();
        assert!(stat.rate() < 1.0);
    }
}
