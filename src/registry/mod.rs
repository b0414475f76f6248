//! Task Registry: the process-wide map from task id to its record and
//! running engine, an `Arc<RwLock<HashMap<...>>>` shared-state idiom
//! applied here at the whole-registry level instead of per-plan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dispatcher::ActionDispatcher;
use crate::engine::{CancellationToken, Engine};
use crate::link::ActionLink;
use crate::llm::LlmClient;
use crate::protocol::{CurrentStepView, Status, StatusDiagnostics, StatusSnapshot, Task};

struct TaskHandle {
    record: RwLock<Task>,
    cancellation: CancellationToken,
}

#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<Uuid, Arc<TaskHandle>>>>,
    link: ActionLink,
    config: Arc<AppConfig>,
}

impl TaskRegistry {
    pub fn new(link: ActionLink, config: Arc<AppConfig>) -> Self {
        Self { tasks: Arc::new(RwLock::new(HashMap::new())), link, config }
    }

    /// Registers a new task and spawns its engine as an owned
    /// background future. Returns the task id immediately; the caller
    /// polls `status` for progress.
    pub async fn submit(&self, objective: String) -> Uuid {
        let task = Task::new(objective);
        let id = task.id;
        let cancellation = CancellationToken::new();
        let handle = Arc::new(TaskHandle { record: RwLock::new(task.clone()), cancellation: cancellation.clone() });

        self.tasks.write().await.insert(id, handle.clone());

        let dispatcher = ActionDispatcher::new(self.link.clone());
        let llm = LlmClient::new(
            self.config.openai_api_key.clone(),
            self.config.model_name.clone(),
            self.config.limits.model_timeout,
        );
        let engine = Engine::new(dispatcher, llm, self.config.clone());

        // `on_update` is a synchronous `FnMut`, but writing the record
        // is async. A naive `tokio::spawn` per call would let two
        // writes race and land out of order, letting a stale snapshot
        // overwrite a newer one - a direct violation of §3 invariant 4
        // (a task's record may only move forward within a phase). An
        // unbounded channel with a single consumer task preserves the
        // order updates were produced in regardless of how the writer
        // tasks get scheduled.
        let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel::<Task>();
        let writer_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(updated) = update_rx.recv().await {
                *writer_handle.record.write().await = updated;
            }
        });

        tokio::spawn(async move {
            engine
                .run(task, cancellation, move |updated| {
                    let _ = update_tx.send(updated);
                })
                .await;
            info!(task_id = %id, "engine worker exited");
        });

        id
    }

    pub async fn status(&self, id: Uuid) -> Option<StatusSnapshot> {
        let tasks = self.tasks.read().await;
        let handle = tasks.get(&id)?;
        let task = handle.record.read().await;
        Some(snapshot(
            &task,
            self.link.state().await.as_str(),
            self.link.is_persistently_disconnected(),
            self.config.limits.max_steps,
        ))
    }

    pub async fn cancel(&self, id: Uuid) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(&id) {
            Some(handle) => {
                handle.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// Signals cancellation to every task currently tracked, regardless
    /// of status. Used on process shutdown so in-flight engine workers
    /// transition to `cancelled` instead of being dropped silently.
    pub async fn cancel_all(&self) -> usize {
        let tasks = self.tasks.read().await;
        for handle in tasks.values() {
            handle.cancellation.cancel();
        }
        tasks.len()
    }

    /// Waits until every tracked task reaches a terminal status, or
    /// `timeout` elapses, whichever comes first. Intended to be called
    /// right after `cancel_all` during shutdown.
    pub async fn wait_for_drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let all_terminal = {
                let tasks = self.tasks.read().await;
                let mut terminal = true;
                for handle in tasks.values() {
                    if !handle.record.read().await.status.is_terminal() {
                        terminal = false;
                        break;
                    }
                }
                terminal
            };

            if all_terminal {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                info!("shutdown drain timeout elapsed with tasks still in-flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn exists(&self, id: Uuid) -> bool {
        self.tasks.read().await.contains_key(&id)
    }
}

fn snapshot(task: &Task, link_state: &str, link_persistently_disconnected: bool, max_steps: u32) -> StatusSnapshot {
    let current_step = task.history.last().map(|step| CurrentStepView {
        index: step.index,
        action: step.action.clone(),
        description: step.rationale.clone(),
    });

    StatusSnapshot {
        status: task.status,
        steps_executed: task.history.len() as u32,
        total_steps: max_steps,
        current_step,
        retry_count: task.consecutive_failures,
        verification: task.final_verification.clone(),
        diagnostics: StatusDiagnostics {
            link_state: link_state.to_string(),
            link_persistently_disconnected,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EngineLimits;

    fn test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            openai_api_key: "test-key".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            port: 8080,
            limits: EngineLimits::default(),
            screenshot_policy: crate::config::ScreenshotPolicy::FinalOnly,
        })
    }

    #[tokio::test]
    async fn unknown_task_status_is_none() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let registry = TaskRegistry::new(link, test_config());
        assert!(registry.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn submitted_task_is_queryable_immediately() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let registry = TaskRegistry::new(link, test_config());
        let id = registry.submit("open example.com".to_string()).await;
        assert!(registry.exists(id).await);
    }

    #[tokio::test]
    async fn cancelling_unknown_task_returns_false() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let registry = TaskRegistry::new(link, test_config());
        assert!(!registry.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn total_steps_reports_the_configured_budget_not_steps_so_far() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let registry = TaskRegistry::new(link, test_config());
        let id = registry.submit("open example.com".to_string()).await;
        let status = registry.status(id).await.unwrap();
        assert_eq!(status.total_steps, EngineLimits::default().max_steps);
    }

    #[tokio::test]
    async fn cancel_all_drives_every_tracked_task_to_a_terminal_status() {
        let link = ActionLink::new(Arc::new(EngineLimits::default()));
        let registry = TaskRegistry::new(link, test_config());
        let id = registry.submit("open example.com".to_string()).await;

        registry.cancel_all().await;
        registry.wait_for_drain(Duration::from_secs(2)).await;

        let status = registry.status(id).await.unwrap();
        assert!(status.status.is_terminal());
    }
}
