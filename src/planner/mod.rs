//! Planner/Verifier: thin policy wrappers around the LLM Client,
//! responsible for nothing but turning a task's current state into a
//! prompt and the model's JSON reply back into a typed decision.
//!
//! A small struct holding shared dependencies with async methods that
//! each do one thing, in the same shape as `retry::RetryExecutor`.

use serde_json::Value;

use crate::errors::EngineError;
use crate::llm::{CallKind, LlmClient};
use crate::prompt;
use crate::protocol::{Observation, Task, Verdict};

/// The model's choice of next action, or a declaration that the task
/// is already done.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action: String,
    pub payload: Value,
    pub reason: String,
    pub done: bool,
}

pub struct Planner<'a> {
    llm: &'a LlmClient,
}

impl<'a> Planner<'a> {
    pub fn new(llm: &'a LlmClient) -> Self {
        Self { llm }
    }

    pub async fn plan_next(&self, task: &Task, observation: &Observation) -> Result<PlannedAction, EngineError> {
        let schema = prompt::plan_response_schema();
        let user_prompt = prompt::plan_user_prompt(task, observation);
        let value = self
            .llm
            .complete_json(CallKind::Plan, prompt::plan_system_prompt(), &user_prompt, &schema)
            .await?;

        Ok(PlannedAction {
            action: value["action"].as_str().unwrap_or_default().to_string(),
            payload: value.get("payload").cloned().unwrap_or(Value::Null),
            reason: value["reason"].as_str().unwrap_or_default().to_string(),
            done: value["done"].as_bool().unwrap_or(false),
        })
    }

    pub async fn verify_step(
        &self,
        task: &Task,
        action: &str,
        before: &Observation,
        after: &Observation,
    ) -> Result<(Verdict, String), EngineError> {
        let schema = prompt::verify_response_schema();
        let user_prompt = prompt::verify_step_user_prompt(task, action, before, after);
        let value = self
            .llm
            .complete_json(CallKind::Verify, prompt::verify_system_prompt(), &user_prompt, &schema)
            .await?;

        Ok((parse_verdict(&value), value["reason"].as_str().unwrap_or_default().to_string()))
    }

    pub async fn verify_final(&self, task: &Task, final_observation: &Observation) -> Result<(Verdict, String), EngineError> {
        let schema = prompt::verify_response_schema();
        let user_prompt = prompt::verify_final_user_prompt(task, final_observation);
        let value = self
            .llm
            .complete_json(CallKind::Verify, prompt::verify_system_prompt(), &user_prompt, &schema)
            .await?;

        Ok((parse_verdict(&value), value["reason"].as_str().unwrap_or_default().to_string()))
    }
}

fn parse_verdict(value: &Value) -> Verdict {
    match value["verdict"].as_str() {
        Some("ok") => Verdict::Ok,
        Some("retry") => Verdict::Retry,
        _ => Verdict::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_verdict_defaults_to_fail_on_unknown_value() {
        assert!(matches!(parse_verdict(&json!({"verdict": "maybe"})), Verdict::Fail));
        assert!(matches!(parse_verdict(&json!({"verdict": "ok"})), Verdict::Ok));
        assert!(matches!(parse_verdict(&json!({"verdict": "retry"})), Verdict::Retry));
    }
}
