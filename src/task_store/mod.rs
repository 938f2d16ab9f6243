mod memory_task_store;
mod models;
mod mongo_task_store;

pub use memory_task_store::InMemoryTaskStore;
pub use models::*;
pub use mongo_task_store::MongoTaskStore;

use anyhow::Result;
use async_trait::async_trait;

/// Number of tasks returned by the task listing endpoint.
pub const RECENT_TASKS_LIMIT: usize = 20;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn record_task_start(&self, task: &TaskRecord) -> Result<()>;
    /// Moves a running task to a terminal state. Tasks already in a terminal
    /// state are left untouched; returns whether the task was updated.
    async fn record_task_finish(&self, task_id: &str, finish: &TaskFinish) -> Result<bool>;
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;
    /// Most recent first, by start time.
    async fn list_recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>>;
    async fn get_running_tasks(&self) -> Result<Vec<TaskRecord>>;
    /// Marks every task still recorded as running as failed with `reason`.
    async fn mark_stale_tasks_failed(&self, reason: &str) -> Result<usize>;
}
