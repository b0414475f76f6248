//! LLM Client: a thin reqwest wrapper around an OpenAI-compatible
//! chat-completions endpoint, with strict JSON-contract enforcement.
//!
//! Builds the request, sends it, and parses the JSON response, then
//! runs the result through `JSONSchema::compile`/`validate` the same
//! way a response body gets asserted against a contract elsewhere. A
//! response that fails to parse or fails schema validation is treated
//! identically and retried, up to `MAX_REPAIR_ATTEMPTS` times, asking
//! the model to emit corrected JSON before surfacing a
//! `model_parse_error`.

use std::time::Duration;

use jsonschema::JSONSchema;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{EngineError, ErrorCode};

const MAX_REPAIR_ATTEMPTS: u32 = 2;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Plan,
    Verify,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    response_format: Value,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        }
    }

    /// Sends `system_prompt` + `user_prompt`, parses the reply as JSON,
    /// validates it against `schema`, and repairs/retries on failure
    /// before giving up with a `Model` error.
    pub async fn complete_json(
        &self,
        kind: CallKind,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
    ) -> Result<Value, EngineError> {
        let compiled_schema = JSONSchema::compile(schema).map_err(|e| {
            EngineError::Internal(ErrorCode::INTERNAL_ERROR, format!("invalid response schema: {e}"))
        })?;

        let mut messages = vec![
            ChatMessage { role: "system", content: system_prompt.to_string() },
            ChatMessage { role: "user", content: user_prompt.to_string() },
        ];

        let mut last_error = String::new();
        let mut last_code = ErrorCode::MODEL_PARSE_ERROR;

        for attempt in 0..=MAX_REPAIR_ATTEMPTS {
            let raw = self.send(&messages).await?;

            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    if compiled_schema.validate(&value).is_ok() {
                        return Ok(value);
                    }
                    last_code = ErrorCode::MODEL_SCHEMA_VIOLATION;
                    last_error = "response did not match the required schema".to_string();
                }
                Err(e) => {
                    last_code = ErrorCode::MODEL_PARSE_ERROR;
                    last_error = format!("response was not valid JSON: {e}");
                }
            }

            if attempt < MAX_REPAIR_ATTEMPTS {
                tracing::warn!(?kind, attempt, error = %last_error, "repairing malformed model response");
                messages.push(ChatMessage { role: "assistant", content: raw });
                messages.push(ChatMessage {
                    role: "user",
                    content: format!(
                        "That response was invalid: {last_error}. Reply again with ONLY the corrected JSON object, nothing else."
                    ),
                });
            }
        }

        Err(EngineError::Model(last_code, last_error))
    }

    async fn send(&self, messages: &[ChatMessage<'_>]) -> Result<String, EngineError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.1,
            max_tokens: DEFAULT_MAX_TOKENS,
            response_format: json!({ "type": "json_object" }),
            messages: messages.iter().map(|m| ChatMessage { role: m.role, content: m.content.clone() }).collect(),
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Model(ErrorCode::MODEL_TRANSPORT, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Model(
                ErrorCode::MODEL_TRANSPORT,
                format!("model endpoint returned {status}: {body}"),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Model(ErrorCode::MODEL_TRANSPORT, e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Model(ErrorCode::MODEL_TRANSPORT, "empty choices array".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_compiles_for_plan_contract() {
        let schema = json!({
            "type": "object",
            "required": ["action", "payload", "reason"],
            "properties": {
                "action": { "type": "string" },
                "payload": { "type": "object" },
                "reason": { "type": "string" },
                "done": { "type": "boolean" }
            }
        });
        assert!(JSONSchema::compile(&schema).is_ok());
    }

    #[test]
    fn repair_attempt_budget_is_small_and_finite() {
        assert_eq!(MAX_REPAIR_ATTEMPTS, 2);
    }
}
