//! The Action Dispatcher: one typed method per action kind, each
//! validating its own payload before ever touching the Action Link.
//!
//! Shaped as one method per action kind rather than one trait impl
//! per action family, since every action here goes over the same
//! transport and gains nothing from a separate dispatch trait.

use serde_json::{json, Value};

use crate::errors::EngineError;
use crate::link::ActionLink;
use crate::validation::{self, ValidationError};

/// Result of dispatching a single action call.
#[derive(Debug)]
pub enum DispatchOutcome {
    Ok(Value),
    ActionError(String),
    Timeout,
    TransportError(String),
}

impl From<EngineError> for DispatchOutcome {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Action(_, msg) => DispatchOutcome::ActionError(msg),
            EngineError::ActionTimeout(..) => DispatchOutcome::Timeout,
            EngineError::Transport(_, msg) => DispatchOutcome::TransportError(msg),
            other => DispatchOutcome::TransportError(other.to_string()),
        }
    }
}

/// A locator for `smartClick`: at least one field must be set. Mirrors
/// the element-matching fields the browser agent accepts.
#[derive(Debug, Clone, Default)]
pub struct SmartLocator {
    pub selector: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub aria_label: Option<String>,
    pub role: Option<String>,
    pub text: Option<String>,
    pub description: Option<String>,
}

impl SmartLocator {
    fn into_payload(self) -> Value {
        let mut payload = json!({});
        if let Some(v) = self.selector {
            payload["selector"] = json!(v);
        }
        if let Some(v) = self.id {
            payload["id"] = json!(v);
        }
        if let Some(v) = self.name {
            payload["name"] = json!(v);
        }
        if let Some(v) = self.aria_label {
            payload["ariaLabel"] = json!(v);
        }
        if let Some(v) = self.role {
            payload["role"] = json!(v);
        }
        if let Some(v) = self.text {
            payload["text"] = json!(v);
        }
        if let Some(v) = self.description {
            payload["description"] = json!(v);
        }
        payload
    }
}

pub struct ActionDispatcher {
    link: ActionLink,
}

impl ActionDispatcher {
    pub fn new(link: ActionLink) -> Self {
        Self { link }
    }

    async fn dispatch(&self, action: &str, payload: Value) -> DispatchOutcome {
        if let Err(errors) = validation::validate_action_payload(action, &payload) {
            return DispatchOutcome::ActionError(render_validation_errors(&errors));
        }

        match self.link.call(action, payload).await {
            Ok(data) => DispatchOutcome::Ok(data),
            Err(err) => err.into(),
        }
    }

    pub async fn navigate(&self, url: &str) -> DispatchOutcome {
        self.dispatch("navigate", json!({ "url": url })).await
    }

    pub async fn wait_for(&self, selector: &str, timeout_ms: Option<u64>) -> DispatchOutcome {
        let mut payload = json!({ "selector": selector });
        if let Some(ms) = timeout_ms {
            payload["timeoutMs"] = json!(ms);
        }
        self.dispatch("waitFor", payload).await
    }

    pub async fn click(&self, selector: &str) -> DispatchOutcome {
        self.dispatch("click", json!({ "selector": selector })).await
    }

    pub async fn type_text(&self, selector: &str, text: &str) -> DispatchOutcome {
        self.dispatch("type", json!({ "selector": selector, "text": text })).await
    }

    pub async fn press(&self, key: &str) -> DispatchOutcome {
        self.dispatch("press", json!({ "key": key })).await
    }

    pub async fn query(&self, selector: &str) -> DispatchOutcome {
        self.dispatch("query", json!({ "selector": selector })).await
    }

    pub async fn get_page_info(&self) -> DispatchOutcome {
        self.dispatch("getPageInfo", json!({})).await
    }

    pub async fn get_interactive_elements(&self) -> DispatchOutcome {
        self.dispatch("getInteractiveElements", json!({})).await
    }

    pub async fn smart_click(&self, locator: SmartLocator) -> DispatchOutcome {
        self.dispatch("smartClick", locator.into_payload()).await
    }

    pub async fn smart_type(&self, text: &str, selector: Option<&str>) -> DispatchOutcome {
        let mut payload = json!({ "text": text });
        if let Some(selector) = selector {
            payload["selector"] = json!(selector);
        }
        self.dispatch("smartType", payload).await
    }

    pub async fn switch_tab(&self, index: u64) -> DispatchOutcome {
        self.dispatch("switchTab", json!({ "index": index })).await
    }

    pub async fn download(&self, url: &str) -> DispatchOutcome {
        self.dispatch("download", json!({ "url": url })).await
    }

    pub async fn upload_file(&self, selector: Option<&str>) -> DispatchOutcome {
        let mut payload = json!({});
        if let Some(selector) = selector {
            payload["selector"] = json!(selector);
        }
        self.dispatch("uploadFile", payload).await
    }

    pub async fn capture_screenshot(&self, full_page: bool) -> DispatchOutcome {
        self.dispatch("captureScreenshot", json!({ "fullPage": full_page })).await
    }

    /// Generic escape hatch used by the engine when the planner emits
    /// an action/payload pair directly from the model response.
    pub async fn dispatch_raw(&self, action: &str, payload: Value) -> DispatchOutcome {
        self.dispatch(action, payload).await
    }
}

fn render_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code(), e))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EngineLimits;
    use std::sync::Arc;

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(ActionLink::new(Arc::new(EngineLimits::default())))
    }

    #[tokio::test]
    async fn navigate_without_connection_is_a_transport_error() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.navigate("https://example.com").await;
        assert!(matches!(outcome, DispatchOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn navigate_with_forbidden_scheme_is_rejected_before_dispatch() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.navigate("chrome://settings").await;
        assert!(matches!(outcome, DispatchOutcome::ActionError(_)));
    }

    #[tokio::test]
    async fn click_without_selector_payload_is_rejected_locally() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.dispatch_raw("click", json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::ActionError(_)));
    }

    #[tokio::test]
    async fn smart_click_with_no_locator_field_set_is_rejected_locally() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.smart_click(SmartLocator::default()).await;
        assert!(matches!(outcome, DispatchOutcome::ActionError(_)));
    }

    #[tokio::test]
    async fn smart_click_with_a_single_locator_field_passes_validation() {
        let dispatcher = dispatcher();
        let locator = SmartLocator { description: Some("the submit button".to_string()), ..Default::default() };
        let outcome = dispatcher.smart_click(locator).await;
        // Validation passes; the link itself has no connection.
        assert!(matches!(outcome, DispatchOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn smart_type_without_selector_is_still_valid() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.smart_type("hello", None).await;
        assert!(matches!(outcome, DispatchOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn upload_file_without_selector_is_valid() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.upload_file(None).await;
        assert!(matches!(outcome, DispatchOutcome::TransportError(_)));
    }
}
