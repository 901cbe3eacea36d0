//! Dispatcher configuration.
//!
//! Mirrors the driver's config-file arguments: the source queue, the
//! worker event to emit, timeout knobs, and the replica groups used by
//! the queue backend. Validation happens once at construction; the
//! engine treats a [`DispatcherConfig`] that passed
//! [`validate`](DispatcherConfig::validate) as fully trusted.

use std::time::Duration;

use serde::Deserialize;

use crate::capacity::{DEFAULT_BATCH_WIDTH, DEFAULT_MIN_FETCH_SLACK};
use crate::error::ConfigError;

/// Default pop event exposed by the queue application.
pub const DEFAULT_POP_EVENT: &str = "pop-multiple-string";

/// Default idle timer period.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for one dispatcher instance.
///
/// The `queue_limit` comes from the worker pool's profile and is only
/// read here to size the outstanding-work budget.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Name of the source queue application.
    pub queue_name: String,

    /// Pop event exposed by the queue; addressed as
    /// `"{queue_name}@{pop_event}"`.
    #[serde(default = "default_pop_event")]
    pub pop_event: String,

    /// Event to emit on the worker pool, in `"app@event"` form.
    pub worker_event: String,

    /// Soft timeout applied uniformly to every dispatch.
    #[serde(default)]
    pub timeout: Duration,

    /// Hard deadline applied uniformly to every dispatch.
    #[serde(default)]
    pub deadline: Duration,

    /// Replica groups the backend fans requests out to.
    #[serde(default)]
    pub groups: Vec<u32>,

    /// Optional queue-specific group override; takes precedence over
    /// `groups` when present.
    #[serde(default)]
    pub queue_groups: Option<Vec<u32>>,

    /// Queue limit from the worker pool profile; the outstanding-work
    /// budget is derived from this.
    pub queue_limit: u64,

    /// Period of the idle timer that keeps the fetch loop progressing
    /// when no dispatch completions arrive.
    #[serde(default = "default_idle_interval")]
    pub idle_interval: Duration,

    /// Minimum free capacity required before a fetch batch is issued.
    #[serde(default = "default_min_fetch_slack")]
    pub min_fetch_slack: u64,

    /// Number of concurrent fetch requests per batch.
    #[serde(default = "default_batch_width")]
    pub batch_width: u32,
}

fn default_pop_event() -> String {
    DEFAULT_POP_EVENT.to_string()
}

fn default_idle_interval() -> Duration {
    DEFAULT_IDLE_INTERVAL
}

fn default_min_fetch_slack() -> u64 {
    DEFAULT_MIN_FETCH_SLACK
}

fn default_batch_width() -> u32 {
    DEFAULT_BATCH_WIDTH
}

impl DispatcherConfig {
    /// Validate the configuration.
    ///
    /// Errors here are fatal at construction: the engine must not
    /// start with a config that fails any of these checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.is_empty() {
            return Err(ConfigError::MissingQueueName);
        }
        match self.worker_event.split_once('@') {
            Some((app, event)) if !app.is_empty() && !event.is_empty() => {}
            _ => {
                return Err(ConfigError::InvalidWorkerEvent(
                    self.worker_event.clone(),
                ))
            }
        }
        if self.queue_limit == 0 {
            return Err(ConfigError::ZeroQueueLimit);
        }
        if self.effective_groups().is_empty() {
            return Err(ConfigError::MissingGroups);
        }
        if self.batch_width == 0 {
            return Err(ConfigError::ZeroBatchWidth);
        }
        Ok(())
    }

    /// Full pop-event address, `"{queue_name}@{pop_event}"`.
    pub fn pop_event_address(&self) -> String {
        format!("{}@{}", self.queue_name, self.pop_event)
    }

    /// Groups the backend should address: the queue-specific override
    /// when present, the shared group list otherwise.
    pub fn effective_groups(&self) -> &[u32] {
        match &self.queue_groups {
            Some(groups) => groups,
            None => &self.groups,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DispatcherConfig {
        DispatcherConfig {
            queue_name: "queue".to_string(),
            pop_event: DEFAULT_POP_EVENT.to_string(),
            worker_event: "testapp@emit".to_string(),
            timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
            groups: vec![1, 2, 3],
            queue_groups: None,
            queue_limit: 1000,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            min_fetch_slack: DEFAULT_MIN_FETCH_SLACK,
            batch_width: DEFAULT_BATCH_WIDTH,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_queue_name_rejected() {
        let mut config = base_config();
        config.queue_name.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingQueueName)
        ));
    }

    #[test]
    fn worker_event_without_at_sign_rejected() {
        let mut config = base_config();
        config.worker_event = "emit".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerEvent(_))
        ));
    }

    #[test]
    fn worker_event_with_empty_halves_rejected() {
        let mut config = base_config();
        config.worker_event = "@emit".to_string();
        assert!(config.validate().is_err());
        config.worker_event = "testapp@".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_queue_limit_rejected() {
        let mut config = base_config();
        config.queue_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroQueueLimit)
        ));
    }

    #[test]
    fn empty_groups_rejected() {
        let mut config = base_config();
        config.groups.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingGroups)));
    }

    #[test]
    fn queue_groups_override_satisfies_group_check() {
        let mut config = base_config();
        config.groups.clear();
        config.queue_groups = Some(vec![7]);
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_groups(), &[7]);
    }

    #[test]
    fn zero_batch_width_rejected() {
        let mut config = base_config();
        config.batch_width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroBatchWidth)
        ));
    }

    #[test]
    fn pop_event_address_joins_queue_and_event() {
        assert_eq!(base_config().pop_event_address(), "queue@pop-multiple-string");
    }
}
