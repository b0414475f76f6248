//! The Execution Engine: the observe-plan-act-verify state machine
//! that drives a single task from `queued` to a terminal state.
//!
//! Loops over steps and tracks attempts against a fixed budget, the
//! same shape as a sequential step-runner with retry. The step and
//! retry budgets here are fixed engine limits, and a verifier judgment
//! sits between each action and the next plan instead of an assertion
//! list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use crate::config::{AppConfig, ScreenshotPolicy};
use crate::dispatcher::{ActionDispatcher, DispatchOutcome};
use crate::errors::{EngineError, ErrorCode};
use crate::llm::LlmClient;
use crate::observer::Observer;
use crate::planner::Planner;
use crate::protocol::{Status, Step, StepOutcome, Task, Verdict};

/// Cooperative cancellation handle shared between a task's HTTP-facing
/// record and its running engine future.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a single task to completion (or cancellation), mutating it in
/// place through a caller-held lock between iterations.
pub struct Engine {
    dispatcher: ActionDispatcher,
    llm: LlmClient,
    config: Arc<AppConfig>,
}

impl Engine {
    pub fn new(dispatcher: ActionDispatcher, llm: LlmClient, config: Arc<AppConfig>) -> Self {
        Self { dispatcher, llm, config }
    }

    /// Drives `task` forward until it reaches a terminal status or
    /// `cancellation` fires. `on_update` is invoked after every
    /// mutation so the registry's lock only needs to be held briefly.
    #[instrument(skip(self, task, cancellation, on_update), fields(task_id = %task.id))]
    pub async fn run<F>(&self, mut task: Task, cancellation: CancellationToken, mut on_update: F)
    where
        F: FnMut(Task) + Send,
    {
        let planner = Planner::new(&self.llm);
        let observer = Observer::new(&self.dispatcher);

        task.status = Status::Planning;
        on_update(task.clone());

        // Tracks how many consecutive times the current logical step
        // (same action string) has been attempted, so a replanned retry
        // of the same action reports attempt 2, 3, ... instead of
        // always claiming to be a first try. A different action (the
        // planner adapted, or a brand new step started) resets it.
        let mut attempt_tracker: Option<(String, u32)> = None;

        loop {
            if cancellation.is_cancelled() {
                task.status = Status::Cancelled;
                on_update(task);
                return;
            }

            if task.step_index >= self.config.limits.max_steps {
                warn!(task_id = %task.id, "task exhausted its step budget");
                task.status = Status::Failed;
                task.final_verification = Some(format!(
                    "[{}] step budget exhausted before the objective was met",
                    ErrorCode::STEP_BUDGET_EXHAUSTED
                ));
                on_update(task);
                return;
            }

            let before = tokio::select! {
                observation = observer.observe() => observation,
                _ = cancellation.cancelled() => { task.status = Status::Cancelled; on_update(task); return; }
            };
            task.last_observation = Some(before.clone());

            task.status = Status::Planning;
            let planned = tokio::select! {
                result = planner.plan_next(&task, &before) => result,
                _ = cancellation.cancelled() => { task.status = Status::Cancelled; on_update(task); return; }
            };

            let planned = match planned {
                Ok(p) => p,
                Err(e) => {
                    if !self.register_failure(&mut task, &e) {
                        on_update(task);
                        return;
                    }
                    on_update(task.clone());
                    continue;
                }
            };

            if planned.done {
                task.status = Status::Verifying;
                on_update(task.clone());
                self.finish_task(&mut task, &planner, &before).await;
                on_update(task);
                return;
            }

            task.status = Status::Processing;
            task.last_rationale = Some(planned.reason.clone());
            let step_index = task.step_index;

            let attempt = match &attempt_tracker {
                Some((action, count)) if *action == planned.action => count + 1,
                _ => 1,
            };
            attempt_tracker = Some((planned.action.clone(), attempt));

            let mut step = Step {
                index: step_index,
                action: planned.action.clone(),
                payload: planned.payload.clone(),
                rationale: planned.reason.clone(),
                started_at: Utc::now(),
                ended_at: None,
                outcome: StepOutcome::Error,
                error: None,
                verdict: None,
                verification_text: None,
                attempt,
            };

            let outcome = tokio::select! {
                outcome = self.dispatcher.dispatch_raw(&planned.action, planned.payload.clone()) => outcome,
                _ = cancellation.cancelled() => { task.status = Status::Cancelled; on_update(task); return; }
            };
            step.ended_at = Some(Utc::now());

            match outcome {
                DispatchOutcome::Ok(_) => {
                    step.outcome = StepOutcome::Ok;
                }
                DispatchOutcome::ActionError(msg) => {
                    step.outcome = StepOutcome::Error;
                    step.error = Some(msg);
                }
                DispatchOutcome::Timeout => {
                    step.outcome = StepOutcome::Timeout;
                    step.error = Some("action timed out".to_string());
                }
                DispatchOutcome::TransportError(msg) => {
                    step.outcome = StepOutcome::Error;
                    step.error = Some(msg);
                }
            }

            if step.outcome != StepOutcome::Ok {
                task.history.push(step);
                task.step_index += 1;
                let err = EngineError::Action(
                    crate::errors::ErrorCode::ACTION_ERROR,
                    task.history.last().and_then(|s| s.error.clone()).unwrap_or_default(),
                );
                if !self.register_failure(&mut task, &err) {
                    on_update(task);
                    return;
                }
                on_update(task.clone());
                continue;
            }

            task.status = Status::Verifying;
            let after = observer.observe().await;
            let verdict = planner.verify_step(&task, &planned.action, &before, &after).await;

            match verdict {
                Ok((verdict, reason)) => {
                    step.verdict = Some(verdict);
                    step.verification_text = Some(reason);
                    task.history.push(step);
                    task.step_index += 1;
                    task.last_observation = Some(after);

                    match verdict {
                        Verdict::Ok => {
                            task.consecutive_failures = 0;
                            task.status = Status::Planning;
                            attempt_tracker = None;
                            on_update(task.clone());
                        }
                        Verdict::Retry => {
                            if task.consecutive_failures >= self.config.limits.max_retries {
                                task.status = Status::Failed;
                                task.final_verification =
                                    Some(format!("[{}] retry budget exhausted", ErrorCode::RETRY_BUDGET_EXHAUSTED));
                                on_update(task);
                                return;
                            }
                            task.consecutive_failures += 1;
                            task.status = Status::Replanning;
                            on_update(task.clone());
                        }
                        Verdict::Fail => {
                            task.status = Status::Failed;
                            task.final_verification = Some(format!(
                                "[{}] verifier judged the step unrecoverable",
                                ErrorCode::SEMANTIC_FAILURE
                            ));
                            on_update(task);
                            return;
                        }
                    }
                }
                Err(e) => {
                    step.error = Some(e.to_string());
                    task.history.push(step);
                    task.step_index += 1;
                    if !self.register_failure(&mut task, &e) {
                        on_update(task);
                        return;
                    }
                    on_update(task.clone());
                }
            }
        }
    }

    /// Records a retry-counted failure. Returns `false` when the
    /// consecutive-failure budget is exhausted, in which case the task
    /// has already been transitioned to `failed`.
    fn register_failure(&self, task: &mut Task, err: &EngineError) -> bool {
        error!(task_id = %task.id, error = %err, "engine step failed");
        if !err.counts_as_retry() {
            task.status = Status::Failed;
            task.final_verification = Some(err.to_string());
            return false;
        }

        if task.consecutive_failures >= self.config.limits.max_retries {
            task.status = Status::Failed;
            task.final_verification =
                Some(format!("[{}] retry budget exhausted", ErrorCode::RETRY_BUDGET_EXHAUSTED));
            return false;
        }

        task.consecutive_failures += 1;
        task.status = Status::Replanning;
        true
    }

    async fn finish_task(&self, task: &mut Task, planner: &Planner<'_>, last_observation: &crate::protocol::Observation) {
        match planner.verify_final(task, last_observation).await {
            Ok((Verdict::Ok, reason)) => {
                task.status = Status::Completed;
                task.final_verification = Some(reason);
            }
            Ok((Verdict::Retry, reason)) | Ok((Verdict::Fail, reason)) => {
                task.status = Status::Failed;
                task.final_verification = Some(reason);
            }
            Err(e) => {
                task.status = Status::Failed;
                task.final_verification = Some(e.to_string());
            }
        }

        if self.config.screenshot_policy == ScreenshotPolicy::FinalOnly
            || self.config.screenshot_policy == ScreenshotPolicy::EveryStep
        {
            if let DispatchOutcome::Ok(data) = self.dispatcher.capture_screenshot(false).await {
                task.final_screenshot = data.get("image").and_then(|v| v.as_str()).map(|s| s.to_string());
            }
        }

        info!(task_id = %task.id, status = ?task.status, "task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ActionDispatcher;
    use crate::errors::ErrorCode;
    use crate::limits::EngineLimits;
    use crate::link::ActionLink;
    use crate::llm::LlmClient;

    #[test]
    fn cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() must resolve without waiting when already cancelled");
    }

    fn test_engine(max_retries: u32) -> Engine {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let dispatcher = ActionDispatcher::new(link);
        let llm = LlmClient::new(
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            std::time::Duration::from_secs(5),
        );
        let mut limits = EngineLimits::default();
        limits.max_retries = max_retries;
        let config = Arc::new(AppConfig {
            openai_api_key: "test-key".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            port: 8080,
            limits,
            screenshot_policy: ScreenshotPolicy::FinalOnly,
        });
        Engine::new(dispatcher, llm, config)
    }

    #[test]
    fn register_failure_never_lets_consecutive_failures_exceed_the_budget() {
        let engine = test_engine(3);
        let mut task = Task::new("test".to_string());
        let err = EngineError::Transport(ErrorCode::LINK_CLOSED, "closed".to_string());

        assert!(engine.register_failure(&mut task, &err));
        assert_eq!(task.consecutive_failures, 1);
        assert!(engine.register_failure(&mut task, &err));
        assert_eq!(task.consecutive_failures, 2);
        assert!(engine.register_failure(&mut task, &err));
        assert_eq!(task.consecutive_failures, 3);

        // Budget is exhausted: the fourth failure must fail the task
        // without bumping consecutive_failures past max_retries.
        assert!(!engine.register_failure(&mut task, &err));
        assert_eq!(task.consecutive_failures, 3);
        assert_eq!(task.status, Status::Failed);
    }
}
