//! Validates action payloads before they reach the Action Dispatcher,
//! and gates navigation against forbidden URL schemes.
//!
//! Collects every problem instead of failing on the first, and keeps
//! validation a pure function of the action name and its JSON payload
//! so the dispatcher can call it before ever touching the Action Link.

use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::errors::ErrorCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("action '{0}' is not known")]
    UnknownAction(String),

    #[error("action '{action}': required field '{field}' is missing")]
    MissingField { action: String, field: String },

    #[error("action '{action}': field '{field}' has the wrong type, expected {expected}")]
    WrongFieldType {
        action: String,
        field: String,
        expected: String,
    },

    #[error("action '{action}': at least one of {fields:?} is required")]
    MissingAnyOf { action: String, fields: Vec<String> },

    #[error("url '{0}' uses a forbidden scheme")]
    ForbiddenUrlScheme(String),

    #[error("url '{0}' could not be parsed")]
    MalformedUrl(String),
}

impl ValidationError {
    /// The stable code this validation failure is reported under, drawn
    /// from the same `A2xxx` range the dispatcher's other action errors
    /// use.
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::UnknownAction(_) => ErrorCode::UNKNOWN_ACTION,
            ValidationError::ForbiddenUrlScheme(_) => ErrorCode::FORBIDDEN_URL,
            ValidationError::MissingField { .. }
            | ValidationError::WrongFieldType { .. }
            | ValidationError::MissingAnyOf { .. }
            | ValidationError::MalformedUrl(_) => ErrorCode::INVALID_PAYLOAD,
        }
    }
}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Action kinds the dispatcher knows how to send.
const KNOWN_ACTIONS: &[&str] = &[
    "navigate",
    "waitFor",
    "click",
    "type",
    "press",
    "query",
    "getPageInfo",
    "getInteractiveElements",
    "smartClick",
    "smartType",
    "switchTab",
    "download",
    "uploadFile",
    "captureScreenshot",
];

/// Fields `smartClick` accepts as a locator; at least one must be present.
const SMART_CLICK_LOCATOR_FIELDS: &[&str] =
    &["selector", "id", "name", "ariaLabel", "role", "text", "description"];

/// Schemes rejected for `navigate`/`download` regardless of configuration.
const BASE_FORBIDDEN_SCHEMES: &[&str] = &["chrome", "edge", "about", "chrome-extension"];

static EXTRA_FORBIDDEN_SCHEMES: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("RUNNER_FORBIDDEN_SCHEMES")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
});

/// Validates that `action` is known and `payload` carries the fields
/// that action requires, including the forbidden-scheme gate for
/// anything that navigates the browser.
pub fn validate_action_payload(action: &str, payload: &Value) -> ValidationResult {
    if !KNOWN_ACTIONS.contains(&action) {
        return Err(vec![ValidationError::UnknownAction(action.to_string())]);
    }

    let mut errors = Vec::new();

    match action {
        "navigate" | "download" => {
            require_string_field(action, payload, "url", &mut errors);
            if let Some(url) = payload.get("url").and_then(Value::as_str) {
                if let Err(e) = check_url_allowed(url) {
                    errors.push(e);
                }
            }
        }
        "waitFor" => {
            require_string_field(action, payload, "selector", &mut errors);
        }
        "click" => {
            require_string_field(action, payload, "selector", &mut errors);
        }
        "type" => {
            require_string_field(action, payload, "selector", &mut errors);
            require_string_field(action, payload, "text", &mut errors);
        }
        "press" => {
            require_string_field(action, payload, "key", &mut errors);
        }
        "query" => {
            require_string_field(action, payload, "selector", &mut errors);
        }
        "getPageInfo" | "getInteractiveElements" | "captureScreenshot" => {
            // No required fields.
        }
        "smartClick" => {
            require_at_least_one_string_field(action, payload, SMART_CLICK_LOCATOR_FIELDS, &mut errors);
        }
        "smartType" => {
            require_string_field(action, payload, "text", &mut errors);
            optional_string_field(action, payload, "selector", &mut errors);
        }
        "switchTab" => {
            require_u64_field(action, payload, "index", &mut errors);
        }
        "uploadFile" => {
            optional_string_field(action, payload, "selector", &mut errors);
        }
        _ => unreachable!("action already checked against KNOWN_ACTIONS"),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Rejects a URL whose scheme is on the forbidden list, either one of
/// the built-in browser-internal schemes or an operator-added one from
/// `RUNNER_FORBIDDEN_SCHEMES` (comma-separated, additive only).
pub fn check_url_allowed(raw_url: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(raw_url).map_err(|_| ValidationError::MalformedUrl(raw_url.to_string()))?;
    let scheme = parsed.scheme();

    if BASE_FORBIDDEN_SCHEMES.contains(&scheme) || EXTRA_FORBIDDEN_SCHEMES.iter().any(|s| s == scheme) {
        return Err(ValidationError::ForbiddenUrlScheme(raw_url.to_string()));
    }

    Ok(())
}

fn require_string_field(action: &str, payload: &Value, field: &str, errors: &mut Vec<ValidationError>) {
    match payload.get(field) {
        None => errors.push(ValidationError::MissingField {
            action: action.to_string(),
            field: field.to_string(),
        }),
        Some(v) if v.as_str().is_none() => errors.push(ValidationError::WrongFieldType {
            action: action.to_string(),
            field: field.to_string(),
            expected: "string".to_string(),
        }),
        Some(_) => {}
    }
}

/// Passes if at least one of `fields` is present as a non-empty string;
/// otherwise records a single `MissingAnyOf` error naming all of them.
fn require_at_least_one_string_field(
    action: &str,
    payload: &Value,
    fields: &[&str],
    errors: &mut Vec<ValidationError>,
) {
    let present = fields
        .iter()
        .any(|field| payload.get(*field).and_then(Value::as_str).map(|s| !s.is_empty()).unwrap_or(false));

    if !present {
        errors.push(ValidationError::MissingAnyOf {
            action: action.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
    }
}

/// Checks the type of `field` only if present; the field itself is optional.
fn optional_string_field(action: &str, payload: &Value, field: &str, errors: &mut Vec<ValidationError>) {
    if let Some(v) = payload.get(field) {
        if v.as_str().is_none() {
            errors.push(ValidationError::WrongFieldType {
                action: action.to_string(),
                field: field.to_string(),
                expected: "string".to_string(),
            });
        }
    }
}

fn require_u64_field(action: &str, payload: &Value, field: &str, errors: &mut Vec<ValidationError>) {
    match payload.get(field) {
        None => errors.push(ValidationError::MissingField {
            action: action.to_string(),
            field: field.to_string(),
        }),
        Some(v) if v.as_u64().is_none() => errors.push(ValidationError::WrongFieldType {
            action: action.to_string(),
            field: field.to_string(),
            expected: "non-negative integer".to_string(),
        }),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_action_is_rejected() {
        let result = validate_action_payload("teleport", &json!({}));
        assert_eq!(result, Err(vec![ValidationError::UnknownAction("teleport".to_string())]));
    }

    #[test]
    fn each_validation_error_carries_its_documented_code() {
        assert_eq!(ValidationError::UnknownAction("x".to_string()).code(), ErrorCode::UNKNOWN_ACTION);
        assert_eq!(ValidationError::ForbiddenUrlScheme("x".to_string()).code(), ErrorCode::FORBIDDEN_URL);
        assert_eq!(
            ValidationError::MissingField { action: "a".to_string(), field: "f".to_string() }.code(),
            ErrorCode::INVALID_PAYLOAD
        );
        assert_eq!(ValidationError::MalformedUrl("x".to_string()).code(), ErrorCode::INVALID_PAYLOAD);
    }

    #[test]
    fn navigate_requires_url() {
        let result = validate_action_payload("navigate", &json!({}));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| matches!(e, ValidationError::MissingField { field, .. } if field == "url")));
    }

    #[test]
    fn navigate_accepts_https_url() {
        let result = validate_action_payload("navigate", &json!({ "url": "https://example.com" }));
        assert!(result.is_ok());
    }

    #[test]
    fn navigate_rejects_chrome_scheme() {
        let result = validate_action_payload("navigate", &json!({ "url": "chrome://settings" }));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| matches!(e, ValidationError::ForbiddenUrlScheme(_))));
    }

    #[test]
    fn click_requires_selector() {
        let result = validate_action_payload("click", &json!({}));
        assert_eq!(
            result,
            Err(vec![ValidationError::MissingField {
                action: "click".to_string(),
                field: "selector".to_string()
            }])
        );
    }

    #[test]
    fn type_requires_selector_and_text() {
        let result = validate_action_payload("type", &json!({ "selector": "#q" }));
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ValidationError::MissingField { field, .. } if field == "text"));
    }

    #[test]
    fn get_page_info_has_no_required_fields() {
        assert!(validate_action_payload("getPageInfo", &json!({})).is_ok());
        assert!(validate_action_payload("getInteractiveElements", &json!({})).is_ok());
    }

    #[test]
    fn switch_tab_requires_numeric_index() {
        let result = validate_action_payload("switchTab", &json!({ "index": "first" }));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| matches!(e, ValidationError::WrongFieldType { field, .. } if field == "index")));
    }

    #[test]
    fn malformed_url_is_rejected_distinctly_from_forbidden_scheme() {
        let result = check_url_allowed("not a url");
        assert_eq!(result, Err(ValidationError::MalformedUrl("not a url".to_string())));
    }

    #[test]
    fn smart_click_requires_at_least_one_locator_field() {
        let result = validate_action_payload("smartClick", &json!({}));
        assert!(result.is_err());
        assert!(result.unwrap_err().iter().any(|e| matches!(e, ValidationError::MissingAnyOf { .. })));
    }

    #[test]
    fn smart_click_accepts_any_single_locator_field() {
        assert!(validate_action_payload("smartClick", &json!({ "ariaLabel": "Submit" })).is_ok());
        assert!(validate_action_payload("smartClick", &json!({ "text": "Sign in" })).is_ok());
        assert!(validate_action_payload("smartClick", &json!({ "description": "the submit button" })).is_ok());
    }

    #[test]
    fn smart_type_requires_text_but_not_selector() {
        assert!(validate_action_payload("smartType", &json!({ "text": "hello" })).is_ok());
        let result = validate_action_payload("smartType", &json!({}));
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| matches!(e, ValidationError::MissingField { field, .. } if field == "text")));
    }

    #[test]
    fn smart_type_rejects_non_string_selector_when_present() {
        let result = validate_action_payload("smartType", &json!({ "text": "hi", "selector": 5 }));
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| matches!(e, ValidationError::WrongFieldType { field, .. } if field == "selector")));
    }

    #[test]
    fn upload_file_has_no_required_fields() {
        assert!(validate_action_payload("uploadFile", &json!({})).is_ok());
        assert!(validate_action_payload("uploadFile", &json!({ "selector": "#file" })).is_ok());
    }
}
