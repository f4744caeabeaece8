pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod models;
pub mod performance;
pub mod runtime;

pub use config::ServiceConfig;
pub use error::GatewayError;
pub use events::{EventBus, UpdateEvent};
pub use models::{TaskSnapshot, TaskStatus, TaskSubmission};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use patchpilot_ai::{
    DeferredCoordinator, LlmClient, TaskContext, ToolRegistry, TurnConfig, TurnStateMachine,
};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use performance::{
    Job, JobPriority, QueueError, QueueStatsSnapshot, TaskQueue, TaskQueueConfig, WorkerPool,
    WorkerPoolConfig,
};
use runtime::{ExpirySweeper, TaskEntry, TaskRunner, TaskTable};

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// The agent service: owns every task and the workers that advance them.
///
/// Constructed once and shared by reference with whatever serves the
/// gateway. `start` spawns the worker pool and the deferred-call sweeper;
/// `shutdown` stops taking submissions, drains in-flight jobs and stops both.
pub struct AgentService {
    config: ServiceConfig,
    runner: Arc<TaskRunner>,
    accepting: AtomicBool,
    workers: Mutex<Option<WorkerPool>>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl AgentService {
    pub fn new(config: ServiceConfig, llm: Arc<dyn LlmClient>) -> Self {
        let tools = ToolRegistry::new().with_deferred_timeout(config.agent.deferred_timeout());
        let turn_config = TurnConfig {
            temperature: Some(config.agent.temperature),
            max_turns: config.agent.max_turns,
            ..TurnConfig::default()
        };
        let queue = Arc::new(TaskQueue::new(TaskQueueConfig {
            max_concurrent: config.workers.max_concurrent,
            max_queue_size: config.workers.max_queue_size,
        }));
        let runner = Arc::new(TaskRunner::new(
            Arc::new(TaskTable::new()),
            queue,
            Arc::new(DeferredCoordinator::new()),
            Arc::new(EventBus::default()),
            TurnStateMachine::new(llm, tools, turn_config),
        ));

        Self {
            config,
            runner,
            accepting: AtomicBool::new(true),
            workers: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Spawn workers and the expiry sweeper. Calling it twice is a no-op,
    /// and a service that was shut down stays down.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }
        if self.runner.queue.is_closed() {
            warn!("Agent service was shut down and cannot be restarted");
            return;
        }

        let mut pool = WorkerPool::new(
            self.runner.queue.clone(),
            self.runner.clone(),
            WorkerPoolConfig {
                worker_count: self.config.workers.count,
                idle_sleep: self.config.workers.idle_sleep(),
                max_retries: self.config.workers.max_retries,
            },
        );
        pool.start();
        *workers = Some(pool);

        *self.sweeper.lock().await = Some(ExpirySweeper::spawn(
            self.runner.clone(),
            self.config.agent.expiry_poll(),
            self.config.agent.finished_task_ttl(),
        ));
        self.accepting.store(true, Ordering::SeqCst);
        info!(
            workers = self.config.workers.count,
            max_concurrent = self.config.workers.max_concurrent,
            "Agent service started"
        );
    }

    /// Reject new submissions, wait up to `grace` for queued and running
    /// jobs, then stop workers and the sweeper. Returns true when the queue
    /// drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        info!(grace_ms = grace.as_millis() as u64, "Agent service shutting down");

        let queue = self.runner.queue.clone();
        let drained = tokio::time::timeout(grace, async {
            while !queue.is_idle() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        if let Some(mut pool) = self.workers.lock().await.take() {
            pool.stop().await;
        }
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }

        let stats = queue.get_stats();
        info!(
            drained,
            pending = stats.pending,
            completed = stats.completed,
            failed = stats.failed,
            "Agent service stopped"
        );
        drained
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Create a task at turn 0 and queue its first turn.
    pub fn submit(&self, submission: TaskSubmission) -> Result<String, GatewayError> {
        if !self.is_accepting() {
            return Err(GatewayError::ShuttingDown);
        }

        let task_id = Uuid::new_v4().to_string();
        let TaskSubmission {
            owner_id,
            message_history,
            query,
            code,
        } = submission;
        let context = TaskContext::new(task_id.clone(), owner_id.clone(), message_history, query, code);
        self.runner.tasks.insert(TaskEntry::new(context));

        let job = Job::Turn {
            task_id: task_id.clone(),
        };
        if let Err(QueueError::QueueFull) = self.runner.enqueue(job, JobPriority::Normal) {
            self.runner.tasks.remove(&task_id);
            return Err(GatewayError::QueueFull);
        }

        info!(task_id = %task_id, owner_id = %owner_id, "Task submitted");
        Ok(task_id)
    }

    /// Mark a task for cooperative cancellation.
    ///
    /// A running task stops at its next checkpoint. A task parked on a
    /// deferred call gets a turn scheduled so the cancellation is observed
    /// without waiting for the call to resolve.
    pub fn cancel(&self, owner_id: &str, task_id: &str) -> Result<(), GatewayError> {
        let entry = self.owned_entry(owner_id, task_id)?;
        Self::ensure_active(&entry)?;

        entry.cancel.cancel();
        if entry.status() == TaskStatus::AwaitingApproval {
            let job = Job::Turn {
                task_id: task_id.to_string(),
            };
            if self.runner.enqueue(job, JobPriority::High).is_err() {
                self.runner.finish_cancelled(&entry);
            }
        }

        info!(task_id = %task_id, owner_id = %owner_id, "Task marked for cancellation");
        Ok(())
    }

    /// Resolve a pending deferred call and schedule the task to resume.
    pub fn complete_deferred(
        &self,
        owner_id: &str,
        task_id: &str,
        tool_call_id: &str,
        result: &str,
    ) -> Result<(), GatewayError> {
        let entry = self.owned_entry(owner_id, task_id)?;
        Self::ensure_active(&entry)?;

        let resolution = self
            .runner
            .coordinator
            .complete(task_id, tool_call_id, result)?;
        let job = Job::Resume {
            task_id: task_id.to_string(),
            resolution,
        };
        if self.runner.enqueue(job, JobPriority::High).is_err() {
            self.runner.fail(&entry, "Task queue is full");
            return Err(GatewayError::QueueFull);
        }
        Ok(())
    }

    /// Stream of every update for `owner_id` published from now on.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<UpdateEvent> {
        self.runner.events.subscribe(owner_id)
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.runner.events.subscriber_count(owner_id)
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.runner.tasks.get(task_id).map(|entry| entry.snapshot())
    }

    /// Like [`Self::get_task`] but hides tasks owned by someone else.
    pub fn get_owned_task(&self, owner_id: &str, task_id: &str) -> Option<TaskSnapshot> {
        self.runner
            .tasks
            .get_owned(owner_id, task_id)
            .map(|entry| entry.snapshot())
    }

    /// Expire deferred calls due at `now` without waiting for the sweeper.
    pub fn expire_deferred(&self, now: DateTime<Utc>) -> usize {
        self.runner.expire_due(now)
    }

    pub fn queue_stats(&self) -> QueueStatsSnapshot {
        self.runner.queue.get_stats()
    }

    fn owned_entry(&self, owner_id: &str, task_id: &str) -> Result<Arc<TaskEntry>, GatewayError> {
        self.runner
            .tasks
            .get_owned(owner_id, task_id)
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))
    }

    fn ensure_active(entry: &TaskEntry) -> Result<(), GatewayError> {
        let status = entry.status();
        if status.is_terminal() {
            return Err(GatewayError::TaskFinished {
                task_id: entry.task_id.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use patchpilot_ai::llm::mock_client::MockLlmClient;

    use super::*;

    fn service() -> AgentService {
        AgentService::new(
            ServiceConfig::default(),
            Arc::new(MockLlmClient::new("mock-model")),
        )
    }

    fn submission(owner: &str) -> TaskSubmission {
        TaskSubmission {
            owner_id: owner.to_string(),
            message_history: Vec::new(),
            query: "explain".to_string(),
            code: "x = 1".to_string(),
        }
    }

    #[test]
    fn test_submit_creates_queued_task() {
        let service = service();
        let task_id = service.submit(submission("alice")).unwrap();
        let snapshot = service.get_task(&task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Queued);
        assert_eq!(snapshot.turn, 0);
        assert_eq!(snapshot.code, "x = 1");
        assert_eq!(service.queue_stats().pending, 1);
    }

    #[test]
    fn test_cancel_unknown_or_foreign_task() {
        let service = service();
        let task_id = service.submit(submission("alice")).unwrap();
        assert_eq!(
            service.cancel("alice", "missing"),
            Err(GatewayError::TaskNotFound("missing".to_string()))
        );
        assert!(matches!(
            service.cancel("mallory", &task_id),
            Err(GatewayError::TaskNotFound(_))
        ));
        assert!(service.cancel("alice", &task_id).is_ok());
    }

    #[test]
    fn test_complete_unknown_deferred_call() {
        let service = service();
        let task_id = service.submit(submission("alice")).unwrap();
        assert!(matches!(
            service.complete_deferred("alice", &task_id, "call-404", "ok"),
            Err(GatewayError::Deferred(
                patchpilot_ai::DeferredError::UnknownDeferredCall { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_submissions() {
        let service = service();
        service.start().await;
        assert!(service.shutdown(Duration::from_secs(1)).await);
        assert_eq!(
            service.submit(submission("alice")),
            Err(GatewayError::ShuttingDown)
        );

        service.start().await;
        assert!(!service.is_accepting());
    }

    #[test]
    fn test_get_owned_task_hides_foreign_tasks() {
        let service = service();
        let task_id = service.submit(submission("alice")).unwrap();
        assert!(service.get_owned_task("alice", &task_id).is_some());
        assert!(service.get_owned_task("mallory", &task_id).is_none());
    }

    #[tokio::test]
    async fn test_finished_tasks_release_context_then_expire() {
        let mut config = ServiceConfig::default();
        config.workers.count = 2;
        config.workers.idle_sleep_ms = 1;
        config.agent.expiry_poll_ms = 10;
        config.agent.finished_task_ttl_secs = 0;
        let service = AgentService::new(config, Arc::new(MockLlmClient::new("mock-model")));
        service.start().await;

        let big = TaskSubmission {
            code: "x = 1\n".repeat(10_000),
            ..submission("alice")
        };
        let task_ids: Vec<_> = (0..5)
            .map(|_| service.submit(big.clone()).unwrap())
            .collect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while task_ids.iter().any(|id| service.get_task(id).is_some()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(service.shutdown(Duration::from_secs(1)).await);
    }
}
