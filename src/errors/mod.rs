//! Structured error codes for the task engine.
//!
//! A `E{1..5}xxx`-style scheme, targeted at the five error kinds this
//! system actually produces: transport, action, model, semantic, and
//! internal failures.
//!
//! | Prefix | Category                         |
//! |--------|-----------------------------------|
//! | L1xxx  | Action Link / transport           |
//! | A2xxx  | Action error / action timeout     |
//! | M3xxx  | LLM / model                       |
//! | S4xxx  | Semantic failure / validation     |
//! | I5xxx  | Internal                          |

use std::fmt;

use thiserror::Error;

/// A stable, greppable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(&'static str);

impl ErrorCode {
    pub const LINK_CLOSED: Self = Self("L1001");
    pub const LINK_MALFORMED_FRAME: Self = Self("L1002");
    pub const LINK_BUSY: Self = Self("L1003");
    pub const LINK_DISCONNECTED: Self = Self("L1004");

    pub const ACTION_ERROR: Self = Self("A2001");
    pub const ACTION_TIMEOUT: Self = Self("A2002");
    pub const UNKNOWN_ACTION: Self = Self("A2003");
    pub const FORBIDDEN_URL: Self = Self("A2004");

    pub const MODEL_TRANSPORT: Self = Self("M3001");
    pub const MODEL_PARSE_ERROR: Self = Self("M3002");
    pub const MODEL_SCHEMA_VIOLATION: Self = Self("M3003");

    pub const SEMANTIC_FAILURE: Self = Self("S4001");
    pub const INVALID_PAYLOAD: Self = Self("S4002");
    pub const STEP_BUDGET_EXHAUSTED: Self = Self("S4003");
    pub const RETRY_BUDGET_EXHAUSTED: Self = Self("S4004");

    pub const INTERNAL_ERROR: Self = Self("I5001");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five propagation-distinct error kinds the engine can raise.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[{0}] transport error: {1}")]
    Transport(ErrorCode, String),

    #[error("[{0}] action error: {1}")]
    Action(ErrorCode, String),

    #[error("[{0}] action timed out after {1:?}")]
    ActionTimeout(ErrorCode, std::time::Duration),

    #[error("[{0}] model error: {1}")]
    Model(ErrorCode, String),

    #[error("[{0}] semantic failure: {1}")]
    Semantic(ErrorCode, String),

    #[error("[{0}] invalid payload: {1}")]
    InvalidPayload(ErrorCode, String),

    #[error("[{0}] internal error: {1}")]
    Internal(ErrorCode, String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Transport(c, _)
            | EngineError::Action(c, _)
            | EngineError::ActionTimeout(c, _)
            | EngineError::Model(c, _)
            | EngineError::Semantic(c, _)
            | EngineError::InvalidPayload(c, _)
            | EngineError::Internal(c, _) => *c,
        }
    }

    /// Whether this error should count as one retry unit against a
    /// task's consecutive-failure budget.
    pub fn counts_as_retry(&self) -> bool {
        !matches!(self, EngineError::Semantic(..) | EngineError::Internal(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_display_is_stable() {
        assert_eq!(ErrorCode::LINK_CLOSED.as_str(), "L1001");
        assert_eq!(format!("{}", ErrorCode::MODEL_PARSE_ERROR), "M3002");
    }

    #[test]
    fn semantic_and_internal_do_not_count_as_retries() {
        let semantic = EngineError::Semantic(ErrorCode::SEMANTIC_FAILURE, "nope".into());
        let internal = EngineError::Internal(ErrorCode::INTERNAL_ERROR, "bug".into());
        assert!(!semantic.counts_as_retry());
        assert!(!internal.counts_as_retry());
    }

    #[test]
    fn transport_and_action_errors_count_as_retries() {
        let transport = EngineError::Transport(ErrorCode::LINK_CLOSED, "closed".into());
        let action = EngineError::Action(ErrorCode::ACTION_ERROR, "not found".into());
        let timeout = EngineError::ActionTimeout(ErrorCode::ACTION_TIMEOUT, std::time::Duration::from_secs(20));
        let model = EngineError::Model(ErrorCode::MODEL_PARSE_ERROR, "bad json".into());
        assert!(transport.counts_as_retry());
        assert!(action.counts_as_retry());
        assert!(timeout.counts_as_retry());
        assert!(model.counts_as_retry());
    }
}
