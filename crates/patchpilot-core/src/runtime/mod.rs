//! Task execution: the task table, the job executor and deferred-call expiry.

mod executor;
mod expiry;
mod tasks;

pub use executor::TaskRunner;
pub use expiry::ExpirySweeper;
pub use tasks::{TaskEntry, TaskTable};
