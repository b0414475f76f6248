//! Exponential backoff used by the Action Link's reconnection window.
//!
//! This domain's retry policies are fixed constants rather than a
//! per-step policy parsed from JSON, so only the backoff math itself
//! is needed; the Action Link runs its own loop around it. The LLM
//! Client's repair-retry has no backoff of its own — a malformed
//! response is a schema problem, not a transient one, so it reissues
//! the call immediately with a correction appended.

use std::time::Duration;

/// `delay_n = base * factor^(n-1)`, e.g. the reconnection progression
/// with `base = 1s`, `factor = 2`.
pub fn backoff_delay(attempt: u32, base: Duration, factor: f64) -> Duration {
    let attempt = attempt.max(1);
    let scaled = base.as_secs_f64() * factor.powi(attempt as i32 - 1);
    Duration::from_secs_f64(scaled)
}
