use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::task_queue::{QueuedJob, TaskQueue};

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    /// Number of workers.
    pub worker_count: usize,
    /// Idle sleep interval.
    pub idle_sleep: Duration,
    /// Extra attempts for a job whose execution errored.
    pub max_retries: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 20,
            idle_sleep: Duration::from_millis(10),
            max_retries: 5,
        }
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Run one job. `Ok(false)` is a handled failure and is not retried.
    async fn execute(&self, job: &QueuedJob) -> anyhow::Result<bool>;

    /// Whether an execution error is worth another attempt.
    fn should_retry(&self, _error: &anyhow::Error) -> bool {
        true
    }

    /// Called once a job has failed for the last time.
    async fn abandon(&self, job: &QueuedJob, error: &anyhow::Error);
}

/// Worker pool.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerPoolConfig,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            executor,
            config,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Start all workers.
    pub fn start(&mut self) {
        info!(count = self.config.worker_count, "Starting worker pool");
        for worker_id in 0..self.config.worker_count {
            let queue = self.queue.clone();
            let executor = self.executor.clone();
            let config = self.config.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                Self::worker_loop(worker_id, queue, executor, config, &mut shutdown_rx).await;
            });
            self.handles.push(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Stop all workers. The queue is closed for good; jobs cut off
    /// mid-execution are logged and cleared from the running set.
    pub async fn stop(&mut self) {
        info!("Stopping worker pool");
        self.queue.close();
        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }

        for job in self.queue.drain_running() {
            warn!(
                worker_id = job.worker_id,
                task_id = %job.task_id,
                running_ms = job.started_at.elapsed().as_millis() as u64,
                "Job interrupted by shutdown"
            );
        }
    }

    async fn worker_loop(
        worker_id: usize,
        queue: Arc<TaskQueue>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerPoolConfig,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        info!(worker_id, "Worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id, "Worker shutting down");
                    break;
                }
                _ = Self::process_one(worker_id, &queue, &executor, &config) => {}
            }
        }
    }

    async fn process_one(
        worker_id: usize,
        queue: &TaskQueue,
        executor: &Arc<dyn JobExecutor>,
        config: &WorkerPoolConfig,
    ) {
        let queued = match queue.pop() {
            Some(job) => job,
            None => {
                tokio::time::sleep(config.idle_sleep).await;
                return;
            }
        };

        let Some(_permit) = queue.acquire_permit().await else {
            warn!(worker_id, task_id = %queued.job.task_id(), "Queue closed, dropping job");
            queue.discard(&queued);
            return;
        };

        let task_id = queued.job.task_id().to_string();
        let kind = queued.job.kind();
        let wait_time = queued.submitted_at.elapsed();

        queue.mark_running(&queued, worker_id, wait_time);

        let result = executor.execute(&queued).await;

        match result {
            Ok(true) => {
                queue.mark_completed(queued.id, true);
                info!(worker_id, task_id = %task_id, job = kind, wait_ms = ?wait_time.as_millis(), "Job completed");
            }
            Ok(false) => {
                queue.mark_completed(queued.id, false);
                warn!(worker_id, task_id = %task_id, job = kind, "Job completed with failure");
            }
            // The job stays marked running until it is requeued or abandoned
            // so the queue never looks idle in between.
            Err(e) => {
                let job_id = queued.id;
                if queued.attempt < config.max_retries && executor.should_retry(&e) {
                    warn!(
                        worker_id,
                        task_id = %task_id,
                        job = kind,
                        attempt = queued.attempt + 1,
                        max_retries = config.max_retries,
                        error = %e,
                        "Job failed, retrying"
                    );
                    queue.retry(queued);
                } else {
                    error!(worker_id, task_id = %task_id, job = kind, error = %e, "Job failed");
                    executor.abandon(&queued, &e).await;
                }
                queue.mark_completed(job_id, false);
            }
        }
    }
}
