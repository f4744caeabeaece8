mod task_queue;
mod worker_pool;

pub use task_queue::{
    Job, JobPriority, QueueError, QueueStatsSnapshot, QueuedJob, RunningJobInfo, TaskQueue,
    TaskQueueConfig,
};
pub use worker_pool::{JobExecutor, WorkerPool, WorkerPoolConfig};
