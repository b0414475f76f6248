//! Builds the prompts and response schemas for the two model calls the
//! engine makes: picking the next action, and judging whether a step
//! (or the whole task) succeeded.
//!
//! Prompts are plain string-building functions, kept as terse as
//! `errors::EngineError`'s `#[error(...)]` messages.

use serde_json::{json, Value};

use crate::protocol::{Observation, Step, Task};

pub fn plan_system_prompt() -> &'static str {
    "You control a web browser through a fixed set of actions. Given an \
     objective, the current page observation, and the history of steps \
     already taken, choose exactly one next action. Reply with a single \
     JSON object and nothing else."
}

pub fn plan_response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["action", "payload", "reason", "done"],
        "properties": {
            "action": { "type": "string" },
            "payload": { "type": "object" },
            "reason": { "type": "string" },
            "done": { "type": "boolean" }
        }
    })
}

pub fn plan_user_prompt(task: &Task, observation: &Observation) -> String {
    let history = render_history(&task.history);
    format!(
        "Objective: {objective}\n\nCurrent page:\nurl: {url}\ntitle: {title}\nreadyState: {ready_state}\nvisible elements: {elements}\n\nSteps so far:\n{history}\n\nChoose the next action as JSON: {{\"action\": ..., \"payload\": {{...}}, \"reason\": \"...\", \"done\": false}}. Set \"done\": true once the objective is fully satisfied; omit a payload action in that case and use action \"none\".",
        objective = task.objective,
        url = observation.url,
        title = observation.title,
        ready_state = observation.ready_state,
        elements = serde_json::to_string(&observation.elements).unwrap_or_default(),
    )
}

pub fn verify_system_prompt() -> &'static str {
    "You judge whether a single browser action moved a task toward its \
     objective. Reply with a single JSON object and nothing else."
}

pub fn verify_response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["verdict", "reason"],
        "properties": {
            "verdict": { "type": "string", "enum": ["ok", "retry", "fail"] },
            "reason": { "type": "string" }
        }
    })
}

pub fn verify_step_user_prompt(task: &Task, action: &str, before: &Observation, after: &Observation) -> String {
    format!(
        "Objective: {objective}\n\nAction just taken: {action}\n\nPage before:\nurl: {before_url}\ntitle: {before_title}\n\nPage after:\nurl: {after_url}\ntitle: {after_title}\n\nJudge this single step: did it move toward the objective (\"ok\"), should it be retried (\"retry\"), or has it clearly failed in a way retrying won't fix (\"fail\")? Reply as JSON: {{\"verdict\": \"ok\"|\"retry\"|\"fail\", \"reason\": \"...\"}}.",
        objective = task.objective,
        action = action,
        before_url = before.url,
        before_title = before.title,
        after_url = after.url,
        after_title = after.title,
    )
}

pub fn verify_final_user_prompt(task: &Task, final_observation: &Observation) -> String {
    format!(
        "Objective: {objective}\n\nFinal page state:\nurl: {url}\ntitle: {title}\n\nSteps taken:\n{history}\n\nJudge whether the objective has been fully satisfied. Reply as JSON: {{\"verdict\": \"ok\"|\"fail\", \"reason\": \"...\"}}.",
        objective = task.objective,
        url = final_observation.url,
        title = final_observation.title,
        history = render_history(&task.history),
    )
}

fn render_history(history: &[Step]) -> String {
    if history.is_empty() {
        return "(none yet)".to_string();
    }
    history
        .iter()
        .map(|step| {
            format!(
                "{}. {} (attempt {}) -> {:?}{}",
                step.index,
                step.action,
                step.attempt,
                step.outcome,
                step.error.as_ref().map(|e| format!(" [{e}]")).unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Diagnostics, Task};

    fn sample_observation() -> Observation {
        Observation {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            ready_state: "complete".to_string(),
            elements: vec![],
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn plan_prompt_embeds_objective_and_observation() {
        let task = Task::new("log in as admin".to_string());
        let prompt = plan_user_prompt(&task, &sample_observation());
        assert!(prompt.contains("log in as admin"));
        assert!(prompt.contains("https://example.com"));
    }

    #[test]
    fn plan_schema_requires_done_flag() {
        let schema = plan_response_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "done"));
    }

    #[test]
    fn history_renders_placeholder_when_empty() {
        assert_eq!(render_history(&[]), "(none yet)");
    }

    #[test]
    fn verify_schema_restricts_verdict_enum() {
        let schema = verify_response_schema();
        let verdicts = schema["properties"]["verdict"]["enum"].as_array().unwrap();
        assert_eq!(verdicts.len(), 3);
    }
}
