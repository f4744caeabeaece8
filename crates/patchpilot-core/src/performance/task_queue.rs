use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use patchpilot_ai::DeferredResolution;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Queue priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Normal = 0,
    /// Work a human is waiting on (resumes, cancellations).
    High = 1,
}

/// One unit of work for a task.
#[derive(Debug, Clone)]
pub enum Job {
    /// Take the task's next turn.
    Turn { task_id: String },
    /// Deliver a deferred call's resolution and finish the interrupted turn.
    Resume {
        task_id: String,
        resolution: DeferredResolution,
    },
}

impl Job {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Turn { task_id } | Self::Resume { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Turn { .. } => "turn",
            Self::Resume { .. } => "resume",
        }
    }
}

/// Job queued for execution.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Unique per submission; kept across retries.
    pub id: u64,
    pub job: Job,
    pub submitted_at: Instant,
    pub priority: JobPriority,
    /// Failed executions so far.
    pub attempt: u32,
}

/// Running job details.
pub struct RunningJobInfo {
    pub task_id: String,
    pub started_at: Instant,
    pub worker_id: usize,
}

/// Queue statistics counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    pub pending_count: AtomicUsize,
    pub running_count: AtomicUsize,
    pub completed_count: AtomicU64,
    pub failed_count: AtomicU64,
    pub retried_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub total_exec_time_ms: AtomicU64,
}

/// Queue configuration.
#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    /// Maximum concurrently executing jobs.
    pub max_concurrent: usize,
    /// Maximum queued jobs.
    pub max_queue_size: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 15,
            max_queue_size: 10_000,
        }
    }
}

/// Lock-free job queue with a concurrency semaphore.
pub struct TaskQueue {
    high: SegQueue<QueuedJob>,
    normal: SegQueue<QueuedJob>,
    running: DashMap<u64, RunningJobInfo>,
    next_id: AtomicU64,
    semaphore: Arc<Semaphore>,
    config: TaskQueueConfig,
    stats: Arc<QueueStats>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            high: SegQueue::new(),
            normal: SegQueue::new(),
            running: DashMap::new(),
            next_id: AtomicU64::new(1),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Submit a job to the queue.
    pub fn submit(&self, job: Job, priority: JobPriority) -> Result<u64, QueueError> {
        let pending = self.stats.pending_count.load(Ordering::Relaxed);
        if pending >= self.config.max_queue_size {
            return Err(QueueError::QueueFull);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.push(QueuedJob {
            id,
            job,
            submitted_at: Instant::now(),
            priority,
            attempt: 0,
        });
        Ok(id)
    }

    /// Put a failed job back for another attempt. Bypasses the size limit
    /// since the job already held a slot.
    pub fn retry(&self, mut queued: QueuedJob) {
        queued.attempt += 1;
        queued.submitted_at = Instant::now();
        self.stats.retried_count.fetch_add(1, Ordering::Relaxed);
        self.push(queued);
    }

    fn push(&self, queued: QueuedJob) {
        match queued.priority {
            JobPriority::High => self.high.push(queued),
            JobPriority::Normal => self.normal.push(queued),
        }
        self.stats.pending_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Forget a popped job that will never run.
    pub fn discard(&self, _queued: &QueuedJob) {
        self.stats.pending_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Pop a job from the queue by priority.
    pub fn pop(&self) -> Option<QueuedJob> {
        self.high.pop().or_else(|| self.normal.pop())
    }

    /// Acquire a concurrency permit. `None` once the queue is closed.
    pub async fn acquire_permit(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.ok()
    }

    /// Wake every waiter on the semaphore and refuse new permits.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Mark a job as running.
    pub fn mark_running(&self, job: &QueuedJob, worker_id: usize, wait_time: Duration) {
        let task_id = job.job.task_id();
        self.running.insert(
            job.id,
            RunningJobInfo {
                task_id: task_id.to_string(),
                started_at: Instant::now(),
                worker_id,
            },
        );
        self.stats.running_count.fetch_add(1, Ordering::SeqCst);
        self.stats.pending_count.fetch_sub(1, Ordering::SeqCst);
        self.stats
            .total_wait_time_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Mark a job as finished.
    pub fn mark_completed(&self, job_id: u64, success: bool) {
        if let Some((_, info)) = self.running.remove(&job_id) {
            let exec_time = info.started_at.elapsed().as_millis() as u64;
            self.stats
                .total_exec_time_ms
                .fetch_add(exec_time, Ordering::Relaxed);
            self.stats.running_count.fetch_sub(1, Ordering::SeqCst);
            if success {
                self.stats.completed_count.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.failed_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Forget every job still marked running, counting each as failed.
    /// Only meaningful once no worker can finish them any more.
    pub fn drain_running(&self) -> Vec<RunningJobInfo> {
        let ids: Vec<u64> = self.running.iter().map(|entry| *entry.key()).collect();
        let mut drained = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, info)) = self.running.remove(&id) {
                self.stats.running_count.fetch_sub(1, Ordering::SeqCst);
                self.stats.failed_count.fetch_add(1, Ordering::Relaxed);
                drained.push(info);
            }
        }
        drained
    }

    /// True when nothing is queued or executing.
    pub fn is_idle(&self) -> bool {
        self.stats.pending_count.load(Ordering::SeqCst) == 0
            && self.stats.running_count.load(Ordering::SeqCst) == 0
    }

    /// Snapshot queue stats.
    pub fn get_stats(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pending: self.stats.pending_count.load(Ordering::Relaxed),
            running: self.stats.running_count.load(Ordering::Relaxed),
            completed: self.stats.completed_count.load(Ordering::Relaxed),
            failed: self.stats.failed_count.load(Ordering::Relaxed),
            retried: self.stats.retried_count.load(Ordering::Relaxed),
            avg_exec_time_ms: self.calculate_avg_exec_time(),
            avg_wait_time_ms: self.calculate_avg_wait_time(),
        }
    }

    fn finished_count(&self) -> u64 {
        self.stats.completed_count.load(Ordering::Relaxed)
            + self.stats.failed_count.load(Ordering::Relaxed)
    }

    fn calculate_avg_exec_time(&self) -> u64 {
        let total = self.stats.total_exec_time_ms.load(Ordering::Relaxed);
        let count = self.finished_count();
        if count > 0 { total / count } else { 0 }
    }

    fn calculate_avg_wait_time(&self) -> u64 {
        let total = self.stats.total_wait_time_ms.load(Ordering::Relaxed);
        let count = self.finished_count();
        if count > 0 { total / count } else { 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    QueueFull,
}

#[derive(Debug, Clone)]
pub struct QueueStatsSnapshot {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub avg_exec_time_ms: u64,
    pub avg_wait_time_ms: u64,
}
