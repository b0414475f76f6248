//! The Observer: turns two dispatcher calls into one structured page
//! snapshot.
//!
//! `getPageInfo` and `getInteractiveElements` run concurrently via
//! `tokio::join!`, since the two calls are independent of each other.
//! Either call failing degrades the observation instead of aborting
//! the task — the planner can still act on a partial view, or ask the
//! model to decide what to do next with less information.

use std::time::Instant;

use tracing::{instrument, warn};

use crate::dispatcher::{ActionDispatcher, DispatchOutcome};
use crate::protocol::{Diagnostics, ElementDescriptor, Observation};

pub struct Observer<'a> {
    dispatcher: &'a ActionDispatcher,
}

impl<'a> Observer<'a> {
    pub fn new(dispatcher: &'a ActionDispatcher) -> Self {
        Self { dispatcher }
    }

    #[instrument(skip(self))]
    pub async fn observe(&self) -> Observation {
        let started = Instant::now();
        let (page_info, elements) =
            tokio::join!(self.dispatcher.get_page_info(), self.dispatcher.get_interactive_elements());
        let fetch_duration_ms = started.elapsed().as_millis() as u64;

        let page_info = match page_info {
            DispatchOutcome::Ok(value) => value,
            other => {
                warn!(?other, "getPageInfo failed during observation");
                return Observation::degraded(describe_failure("getPageInfo", other));
            }
        };

        let elements = match elements {
            DispatchOutcome::Ok(value) => {
                serde_json::from_value::<Vec<ElementDescriptor>>(value).unwrap_or_default()
            }
            other => {
                warn!(?other, "getInteractiveElements failed during observation");
                return Observation::degraded(describe_failure("getInteractiveElements", other));
            }
        };

        Observation {
            url: page_info.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            title: page_info.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            ready_state: page_info
                .get("readyState")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            elements,
            diagnostics: Diagnostics {
                error: None,
                fetch_duration_ms: Some(fetch_duration_ms),
            },
        }
    }
}

fn describe_failure(call: &str, outcome: DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::ActionError(msg) => format!("{call} action error: {msg}"),
        DispatchOutcome::Timeout => format!("{call} timed out"),
        DispatchOutcome::TransportError(msg) => format!("{call} transport error: {msg}"),
        DispatchOutcome::Ok(_) => unreachable!("Ok outcomes are handled before calling describe_failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ActionDispatcher;
    use crate::limits::EngineLimits;
    use crate::link::ActionLink;
    use std::sync::Arc;

    #[tokio::test]
    async fn observe_degrades_gracefully_without_a_connection() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let dispatcher = ActionDispatcher::new(link);
        let observer = Observer::new(&dispatcher);
        let observation = observer.observe().await;
        assert!(observation.diagnostics.error.is_some());
        assert!(observation.url.is_empty());
    }
}
