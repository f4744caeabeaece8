//! In-memory task table

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use patchpilot_ai::TaskContext;
use tokio_util::sync::CancellationToken;

use crate::models::{TaskSnapshot, TaskStatus};

/// Fields readable without waiting for the worker that owns the context.
#[derive(Debug, Clone)]
struct Progress {
    status: TaskStatus,
    turn: usize,
    code: String,
    answer: Option<String>,
    error: Option<String>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Progress {
    fn set_status(&mut self, status: TaskStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.finished_at.get_or_insert(now);
        }
    }
}

/// One submitted task.
///
/// The conversation lives behind an async mutex held for the whole of a
/// job, so two jobs for the same task never interleave. It is dropped once
/// the task is finished; the snapshot fields outlive it.
pub struct TaskEntry {
    pub task_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub context: tokio::sync::Mutex<Option<TaskContext>>,
    progress: Mutex<Progress>,
}

impl TaskEntry {
    pub fn new(context: TaskContext) -> Self {
        let now = Utc::now();
        Self {
            task_id: context.task_id.clone(),
            owner_id: context.owner_id.clone(),
            created_at: now,
            cancel: CancellationToken::new(),
            progress: Mutex::new(Progress {
                status: TaskStatus::Queued,
                turn: context.turn,
                code: context.code.as_str().to_string(),
                answer: None,
                error: None,
                updated_at: now,
                finished_at: None,
            }),
            context: tokio::sync::Mutex::new(Some(context)),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.progress.lock().status
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.progress.lock().set_status(status);
    }

    /// Move to `status` unless the task already reached a terminal state.
    /// Returns false when the transition was refused.
    pub fn transition(&self, status: TaskStatus) -> bool {
        let mut progress = self.progress.lock();
        if progress.status.is_terminal() {
            return false;
        }
        progress.set_status(status);
        true
    }

    /// When the task reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.progress.lock().finished_at
    }

    /// Drop the conversation if no job holds it. A job that does hold it
    /// drops it itself on seeing a terminal status.
    pub fn release_context(&self) -> bool {
        match self.context.try_lock() {
            Ok(mut ctx) => ctx.take().is_some(),
            Err(_) => false,
        }
    }

    /// Copy the visible parts of `ctx` after a step.
    pub fn record(&self, ctx: &TaskContext) {
        let mut progress = self.progress.lock();
        progress.turn = ctx.turn;
        progress.code = ctx.code.to_string();
        progress.answer.clone_from(&ctx.final_answer);
        progress.updated_at = Utc::now();
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let mut progress = self.progress.lock();
        progress.error = Some(error.into());
        progress.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let progress = self.progress.lock().clone();
        TaskSnapshot {
            task_id: self.task_id.clone(),
            owner_id: self.owner_id.clone(),
            status: progress.status,
            turn: progress.turn,
            code: progress.code,
            answer: progress.answer,
            error: progress.error,
            created_at: self.created_at,
            updated_at: progress.updated_at,
        }
    }
}

#[derive(Default)]
pub struct TaskTable {
    tasks: DashMap<String, Arc<TaskEntry>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: TaskEntry) -> Arc<TaskEntry> {
        let entry = Arc::new(entry);
        self.tasks.insert(entry.task_id.clone(), entry.clone());
        entry
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    /// Like [`Self::get`] but hides tasks belonging to someone else.
    pub fn get_owned(&self, owner_id: &str, task_id: &str) -> Option<Arc<TaskEntry>> {
        self.get(task_id).filter(|entry| entry.owner_id == owner_id)
    }

    pub fn remove(&self, task_id: &str) -> Option<Arc<TaskEntry>> {
        self.tasks.remove(task_id).map(|(_, entry)| entry)
    }

    /// Forget tasks that finished before `cutoff`. Returns how many went.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, entry| entry.finished_at().is_none_or(|at| at >= cutoff));
        before - self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(task_id: &str) -> TaskEntry {
        TaskEntry::new(TaskContext::new(
            task_id,
            "owner-1",
            Vec::new(),
            "q",
            "a\nb",
        ))
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let entry = entry("t1");
        assert!(entry.transition(TaskStatus::Running));
        entry.set_status(TaskStatus::Cancelled);
        assert!(!entry.transition(TaskStatus::Queued));
        assert_eq!(entry.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn test_get_owned_hides_other_owners() {
        let table = TaskTable::new();
        table.insert(entry("t1"));
        assert!(table.get_owned("owner-1", "t1").is_some());
        assert!(table.get_owned("owner-2", "t1").is_none());
    }

    #[tokio::test]
    async fn test_snapshot_tracks_recorded_context() {
        let entry = entry("t1");
        {
            let mut guard = entry.context.lock().await;
            let ctx = guard.as_mut().unwrap();
            ctx.code = "a\nz".into();
            ctx.turn = 2;
            entry.record(ctx);
        }
        let snapshot = entry.snapshot();
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.code, "a\nz");
        assert_eq!(snapshot.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_release_context_keeps_snapshot() {
        let entry = entry("t1");
        assert!(entry.transition(TaskStatus::Completed));
        assert!(entry.finished_at().is_some());

        assert!(entry.release_context());
        assert!(entry.context.lock().await.is_none());
        assert!(!entry.release_context());

        let snapshot = entry.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.code, "a\nb");
    }

    #[tokio::test]
    async fn test_release_context_waits_for_holder() {
        let entry = entry("t1");
        let guard = entry.context.lock().await;
        assert!(!entry.release_context());
        drop(guard);
        assert!(entry.context.lock().await.is_some());
    }

    #[test]
    fn test_purge_finished_keeps_active_and_recent() {
        let table = TaskTable::new();
        table.insert(entry("active"));
        let done = table.insert(entry("done"));
        done.set_status(TaskStatus::Failed);

        let finished_at = done.finished_at().unwrap();
        assert_eq!(table.purge_finished(finished_at), 0);
        assert!(table.get("done").is_some());

        assert_eq!(
            table.purge_finished(finished_at + chrono::TimeDelta::seconds(1)),
            1
        );
        assert!(table.get("done").is_none());
        assert!(table.get("active").is_some());
    }
}
