//! Outstanding-work capacity policy.
//!
//! Decides how large the in-flight budget is, when a fetch batch may
//! be issued, and how a batch is shaped. Pure functions over plain
//! integers so the policy is testable without the engine.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fraction of the worker pool's queue limit the dispatcher is allowed
/// to keep outstanding, expressed as `limit * NUM / DEN`.
const BUDGET_NUMERATOR: u64 = 9;
const BUDGET_DENOMINATOR: u64 = 10;

/// Minimum free capacity required before a fetch batch is issued.
/// Freed capacity below this is not worth a batch of pop requests.
pub const DEFAULT_MIN_FETCH_SLACK: u64 = 100;

/// Number of concurrent fetch requests issued per batch.
pub const DEFAULT_BATCH_WIDTH: u32 = 10;

// ---------------------------------------------------------------------------
// CapacityPolicy
// ---------------------------------------------------------------------------

/// Shape of one fetch batch: `width` concurrent requests, each asking
/// for `items_per_request` queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub width: u32,
    pub items_per_request: u64,
}

/// Capacity policy for one dispatcher instance.
///
/// Built once at startup from the worker pool's configured queue
/// limit; never mutated afterward.
#[derive(Debug, Clone, Copy)]
pub struct CapacityPolicy {
    max_outstanding: u64,
    min_fetch_slack: u64,
    batch_width: u32,
}

impl CapacityPolicy {
    /// Derive the policy from the worker pool's queue limit.
    ///
    /// The outstanding budget is 90% of the limit (integer math, so
    /// small limits round down).
    pub fn from_queue_limit(queue_limit: u64, min_fetch_slack: u64, batch_width: u32) -> Self {
        Self {
            max_outstanding: queue_limit * BUDGET_NUMERATOR / BUDGET_DENOMINATOR,
            min_fetch_slack,
            batch_width,
        }
    }

    /// The fixed outstanding-work budget.
    pub fn max_outstanding(&self) -> u64 {
        self.max_outstanding
    }

    /// Whether a fetch batch should be issued at the given outstanding
    /// length: true only when at least `min_fetch_slack` of the budget
    /// is free. Saturates, so an over-budget outstanding length never
    /// fetches.
    pub fn should_fetch(&self, outstanding: u64) -> bool {
        self.max_outstanding.saturating_sub(outstanding) >= self.min_fetch_slack
    }

    /// Shape of the next batch: `batch_width` requests, each asking
    /// for an equal share of the budget.
    pub fn batch_plan(&self) -> BatchPlan {
        BatchPlan {
            width: self.batch_width,
            items_per_request: self.max_outstanding / u64::from(self.batch_width),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_max_1000() -> CapacityPolicy {
        // 1112 * 9 / 10 == 1000 (integer division).
        let policy =
            CapacityPolicy::from_queue_limit(1112, DEFAULT_MIN_FETCH_SLACK, DEFAULT_BATCH_WIDTH);
        assert_eq!(policy.max_outstanding(), 1000);
        policy
    }

    #[test]
    fn budget_is_ninety_percent_of_limit() {
        let policy =
            CapacityPolicy::from_queue_limit(1000, DEFAULT_MIN_FETCH_SLACK, DEFAULT_BATCH_WIDTH);
        assert_eq!(policy.max_outstanding(), 900);
    }

    #[test]
    fn small_limits_round_down() {
        let policy =
            CapacityPolicy::from_queue_limit(5, DEFAULT_MIN_FETCH_SLACK, DEFAULT_BATCH_WIDTH);
        assert_eq!(policy.max_outstanding(), 4);
    }

    #[test]
    fn fetches_when_slack_at_least_minimum() {
        let policy = policy_with_max_1000();
        // 1000 - 850 = 150 free, above the 100 threshold.
        assert!(policy.should_fetch(850));
        // Exactly at the threshold still fetches.
        assert!(policy.should_fetch(900));
    }

    #[test]
    fn does_not_fetch_when_slack_below_minimum() {
        let policy = policy_with_max_1000();
        // 1000 - 950 = 50 free, below the 100 threshold.
        assert!(!policy.should_fetch(950));
        assert!(!policy.should_fetch(1000));
    }

    #[test]
    fn does_not_fetch_when_over_budget() {
        let policy = policy_with_max_1000();
        // Transient overshoot; the subtraction must not wrap.
        assert!(!policy.should_fetch(1005));
    }

    #[test]
    fn batch_plan_splits_budget_across_width() {
        let plan = policy_with_max_1000().batch_plan();
        assert_eq!(plan.width, 10);
        assert_eq!(plan.items_per_request, 100);
    }

    #[test]
    fn batch_plan_honors_custom_width() {
        let policy = CapacityPolicy::from_queue_limit(1112, DEFAULT_MIN_FETCH_SLACK, 4);
        let plan = policy.batch_plan();
        assert_eq!(plan.width, 4);
        assert_eq!(plan.items_per_request, 250);
    }

    #[test]
    fn tiny_budget_never_fetches_with_default_slack() {
        let policy =
            CapacityPolicy::from_queue_limit(50, DEFAULT_MIN_FETCH_SLACK, DEFAULT_BATCH_WIDTH);
        assert!(!policy.should_fetch(0));
    }
}
