//! Execution budgets for the task engine.
//!
//! All limits have sane defaults and can be overridden from the
//! environment, following the same `from_env` idiom as
//! `telemetry::TelemetryConfig::from_env`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard cap on steps per task.
pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Consecutive-failure budget before a task fails without reaching the
/// step budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-dispatcher-call deadline.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 20;

/// Soft bound on in-flight requests on the Action Link before
/// submissions fail fast with `busy`.
pub const DEFAULT_LINK_MAX_IN_FLIGHT: usize = 64;

/// Heartbeat interval on the control socket.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

/// LLM call deadline.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineLimits {
    pub max_steps: u32,
    pub max_retries: u32,
    pub action_timeout: Duration,
    pub link_max_in_flight: usize,
    pub heartbeat_interval: Duration,
    pub model_timeout: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_retries: DEFAULT_MAX_RETRIES,
            action_timeout: Duration::from_secs(DEFAULT_ACTION_TIMEOUT_SECS),
            link_max_in_flight: DEFAULT_LINK_MAX_IN_FLIGHT,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }
}

impl EngineLimits {
    /// Builds limits from the environment, falling back to defaults
    /// for anything unset or unparsable.
    ///
    /// Supported variables: `MAX_STEPS`, `MAX_RETRIES`,
    /// `ACTION_TIMEOUT_SECONDS`.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(val) = std::env::var("MAX_STEPS") {
            if let Ok(n) = val.parse() {
                limits.max_steps = n;
            }
        }

        if let Ok(val) = std::env::var("MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                limits.max_retries = n;
            }
        }

        if let Ok(val) = std::env::var("ACTION_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                limits.action_timeout = Duration::from_secs(n);
            }
        }

        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let limits = EngineLimits::default();
        assert_eq!(limits.max_steps, 20);
        assert_eq!(limits.max_retries, 3);
        assert_eq!(limits.action_timeout, Duration::from_secs(20));
    }

    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("MAX_STEPS", "5");
        std::env::set_var("MAX_RETRIES", "1");
        let limits = EngineLimits::from_env();
        assert_eq!(limits.max_steps, 5);
        assert_eq!(limits.max_retries, 1);
        std::env::remove_var("MAX_STEPS");
        std::env::remove_var("MAX_RETRIES");
    }
}
