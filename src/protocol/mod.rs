//! Wire and domain types for the task engine.
//!
//! This module is the single source of truth for every shape that
//! crosses a process boundary: the task record served to HTTP clients,
//! the step history recorded by the engine, the observation snapshot
//! produced by the observer, and the action envelopes exchanged with
//! the browser agent over the control socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// TASK
// ============================================================================

/// A single objective submitted by a client, and everything the engine
/// has learned while pursuing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub objective: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub step_index: u32,
    pub consecutive_failures: u32,
    pub history: Vec<Step>,
    pub last_observation: Option<Observation>,
    pub last_rationale: Option<String>,
    pub final_verification: Option<String>,
    pub final_screenshot: Option<String>,
}

impl Task {
    pub fn new(objective: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            objective,
            created_at: Utc::now(),
            status: Status::Queued,
            step_index: 0,
            consecutive_failures: 0,
            history: Vec::new(),
            last_observation: None,
            last_rationale: None,
            final_verification: None,
            final_screenshot: None,
        }
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Tagged lifecycle state of a task.
///
/// `completed`, `failed`, and `cancelled` are terminal: a task in one of
/// these states must never be mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Planning,
    Processing,
    Verifying,
    Replanning,
    Completed,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

// ============================================================================
// STEP
// ============================================================================

/// One observe-plan-act-verify iteration, occupying one index in a
/// task's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: u32,
    pub action: String,
    pub payload: Value,
    pub rationale: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: StepOutcome,
    pub error: Option<String>,
    pub verdict: Option<Verdict>,
    pub verification_text: Option<String>,
    pub attempt: u32,
}

/// Outcome of dispatching a single step's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Error,
    Timeout,
}

/// The verifier's judgment of a step or the final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Ok,
    Retry,
    Fail,
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// A structured, immutable snapshot of the current page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub ready_state: String,
    pub elements: Vec<ElementDescriptor>,
    pub diagnostics: Diagnostics,
}

impl Observation {
    /// An observation produced when one or both underlying calls
    /// failed. Never aborts a task by itself.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            title: String::new(),
            ready_state: String::new(),
            elements: Vec::new(),
            diagnostics: Diagnostics {
                error: Some(error.into()),
                fetch_duration_ms: None,
            },
        }
    }
}

/// One visible interactive element on the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Non-semantic, debugging-only data attached to an observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub fetch_duration_ms: Option<u64>,
}

// ============================================================================
// ACTION ENVELOPE
// ============================================================================

/// Outbound request frame sent to the browser agent over the control
/// socket.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub id: String,
    pub action: String,
    pub payload: Value,
}

/// Inbound result frame received from the browser agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResponse {
    pub id: String,
    pub status: ActionResponseStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResponseStatus {
    Success,
    Error,
}

/// Control-plane frames that don't carry a correlation id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Connected {
        #[serde(default)]
        from: Option<String>,
    },
    Pong,
}

/// The server's half of the control plane: the only frame the server
/// ever originates without a correlation id is the heartbeat.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerControlFrame {
    Ping,
}

// ============================================================================
// STATUS SURFACE
// ============================================================================

/// Atomic snapshot served by `GET /status/{task_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: Status,
    pub steps_executed: u32,
    pub total_steps: u32,
    pub current_step: Option<CurrentStepView>,
    pub retry_count: u32,
    pub verification: Option<String>,
    pub diagnostics: StatusDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentStepView {
    pub index: u32,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusDiagnostics {
    pub link_state: String,
    pub link_persistently_disconnected: bool,
}
