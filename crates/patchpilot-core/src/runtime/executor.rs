//! Runs queued jobs against the turn state machine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchpilot_ai::{AgentEvent, AiError, DeferredCoordinator, TurnOutcome, TurnStateMachine};
use tracing::{debug, info, warn};

use super::tasks::{TaskEntry, TaskTable};
use crate::events::{EventBus, TaskEventSink};
use crate::models::TaskStatus;
use crate::performance::{Job, JobExecutor, JobPriority, QueueError, QueuedJob, TaskQueue};

pub struct TaskRunner {
    pub(crate) tasks: Arc<TaskTable>,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) coordinator: Arc<DeferredCoordinator>,
    pub(crate) events: Arc<EventBus>,
    machine: TurnStateMachine,
}

impl TaskRunner {
    pub fn new(
        tasks: Arc<TaskTable>,
        queue: Arc<TaskQueue>,
        coordinator: Arc<DeferredCoordinator>,
        events: Arc<EventBus>,
        machine: TurnStateMachine,
    ) -> Self {
        Self {
            tasks,
            queue,
            coordinator,
            events,
            machine,
        }
    }

    pub fn enqueue(&self, job: Job, priority: JobPriority) -> Result<u64, QueueError> {
        let task_id = job.task_id().to_string();
        let kind = job.kind();
        let job_id = self.queue.submit(job, priority)?;
        debug!(task_id = %task_id, job = kind, job_id, "Job enqueued");
        Ok(job_id)
    }

    async fn run_job(&self, job: &Job) -> patchpilot_ai::Result<bool> {
        let Some(entry) = self.tasks.get(job.task_id()) else {
            warn!(task_id = %job.task_id(), job = job.kind(), "Job for unknown task dropped");
            return Ok(false);
        };

        let mut guard = entry.context.lock().await;
        if !entry.transition(TaskStatus::Running) {
            guard.take();
            debug!(task_id = %entry.task_id, status = %entry.status(), "Task already finished, skipping job");
            return Ok(true);
        }
        let Some(ctx) = guard.as_mut() else {
            self.fail(&entry, "Task context was released before the task finished");
            return Ok(false);
        };

        let mut sink = TaskEventSink::new(&self.events, &entry.owner_id, &entry.task_id);
        let result = match job {
            Job::Turn { .. } => {
                self.machine
                    .run_turn(ctx, &self.coordinator, &mut sink, &entry.cancel)
                    .await
            }
            Job::Resume { resolution, .. } => self.machine.resume(
                ctx,
                resolution,
                &self.coordinator,
                &mut sink,
                &entry.cancel,
            ),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                entry.transition(TaskStatus::Queued);
                return Err(e);
            }
        };

        entry.record(ctx);
        let settled = self.settle(&entry, outcome);
        if entry.status().is_terminal() {
            guard.take();
        }
        Ok(settled)
    }

    /// Apply the outcome of one step to the task's status and schedule what
    /// comes next.
    fn settle(&self, entry: &TaskEntry, outcome: TurnOutcome) -> bool {
        match outcome {
            TurnOutcome::Continue => {
                entry.set_status(TaskStatus::Queued);
                let next = Job::Turn {
                    task_id: entry.task_id.clone(),
                };
                if self.enqueue(next, JobPriority::Normal).is_err() {
                    self.fail(entry, "Task queue is full");
                    return false;
                }
                true
            }
            TurnOutcome::Suspended { tool_call_id } => {
                entry.set_status(TaskStatus::AwaitingApproval);
                // A cancel that saw the task still running scheduled nothing.
                if entry.cancel.is_cancelled() {
                    self.finish_cancelled(entry);
                    return true;
                }
                info!(task_id = %entry.task_id, tool_call_id = %tool_call_id, "Task awaiting approval");
                true
            }
            TurnOutcome::Completed { .. } => {
                entry.set_status(TaskStatus::Completed);
                self.coordinator.release_task(&entry.task_id);
                info!(task_id = %entry.task_id, owner_id = %entry.owner_id, "Task completed");
                true
            }
            TurnOutcome::Cancelled => {
                self.finish_cancelled(entry);
                true
            }
            TurnOutcome::TurnLimitReached => {
                let limit = self.machine.config().max_turns;
                self.fail(entry, format!("Task exceeded the limit of {limit} turns"));
                false
            }
        }
    }

    pub(crate) fn finish_cancelled(&self, entry: &TaskEntry) {
        if !entry.transition(TaskStatus::Cancelled) {
            return;
        }
        self.coordinator.release_task(&entry.task_id);
        entry.release_context();
        self.events
            .publish(&entry.owner_id, &entry.task_id, AgentEvent::TaskCancelled);
        info!(task_id = %entry.task_id, owner_id = %entry.owner_id, "Task cancelled");
    }

    pub(crate) fn fail(&self, entry: &TaskEntry, error: impl Into<String>) {
        let error = error.into();
        if !entry.transition(TaskStatus::Failed) {
            return;
        }
        entry.record_error(error.clone());
        self.coordinator.release_task(&entry.task_id);
        entry.release_context();
        warn!(task_id = %entry.task_id, owner_id = %entry.owner_id, error = %error, "Task failed");
        self.events.publish(
            &entry.owner_id,
            &entry.task_id,
            AgentEvent::TaskFailed { error },
        );
    }

    /// Forget finished tasks older than `cutoff`.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let purged = self.tasks.purge_finished(cutoff);
        if purged > 0 {
            debug!(purged, "Purged finished tasks");
        }
        purged
    }

    /// Expire overdue deferred calls and schedule their tasks to resume.
    pub fn expire_due(&self, now: DateTime<Utc>) -> usize {
        let resolutions = self.coordinator.expire_due(now);
        let count = resolutions.len();

        for resolution in resolutions {
            let Some(entry) = self.tasks.get(&resolution.task_id) else {
                continue;
            };
            if entry.status().is_terminal() {
                continue;
            }
            let job = Job::Resume {
                task_id: resolution.task_id.clone(),
                resolution,
            };
            if self.enqueue(job, JobPriority::High).is_err() {
                self.fail(&entry, "Task queue is full");
            }
        }
        count
    }
}

#[async_trait]
impl JobExecutor for TaskRunner {
    async fn execute(&self, job: &QueuedJob) -> anyhow::Result<bool> {
        Ok(self.run_job(&job.job).await?)
    }

    fn should_retry(&self, error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<AiError>()
            .is_none_or(AiError::is_retryable)
    }

    async fn abandon(&self, job: &QueuedJob, error: &anyhow::Error) {
        if let Some(entry) = self.tasks.get(job.job.task_id()) {
            self.fail(&entry, error.to_string());
        }
    }
}
