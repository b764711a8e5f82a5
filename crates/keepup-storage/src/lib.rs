//! keepup-storage: durable task definitions and bounded per-task log history.
//!
//! [`TaskStore`] is the contract the scheduler and workers consume;
//! [`SqliteStore`] is the SQLite-backed implementation.

pub mod sqlite;

use async_trait::async_trait;

use keepup_types::{LogEntry, NetworkTask};

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable keyed storage for tasks and their logs.
///
/// Implementations must make every single call atomic, including the
/// read-modify-write counter updates, since probes of different tasks
/// (and overlapping probes of the same task) call in concurrently.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. The returned copy carries the assigned id.
    async fn insert_task(&self, task: &NetworkTask) -> Result<NetworkTask>;

    async fn read_task(&self, id: i64) -> Result<Option<NetworkTask>>;

    async fn read_task_by_scheduler_id(&self, scheduler_id: i32) -> Result<Option<NetworkTask>>;

    /// All tasks ordered by display index.
    async fn list_tasks(&self) -> Result<Vec<NetworkTask>>;

    /// Tasks whose persisted intent is to be scheduled.
    async fn list_running_tasks(&self) -> Result<Vec<NetworkTask>>;

    /// Delete a task together with its logs. Returns false if it did not exist.
    async fn delete_task(&self, id: i64) -> Result<bool>;

    async fn update_running(&self, id: i64, running: bool) -> Result<()>;

    async fn update_scheduler_id(&self, id: i64, scheduler_id: i32) -> Result<()>;

    async fn update_last_scheduled(&self, id: i64, timestamp: i64) -> Result<()>;

    async fn increment_instances(&self, id: i64) -> Result<()>;

    /// Decrement, never going below zero.
    async fn decrement_instances(&self, id: i64) -> Result<()>;

    async fn reset_instances(&self, id: i64) -> Result<()>;

    async fn reset_all_instances(&self) -> Result<()>;

    /// Increment and return the new failure count.
    async fn increment_failure_count(&self, id: i64) -> Result<i32>;

    async fn reset_failure_count(&self, id: i64) -> Result<()>;

    /// Insert a log entry and evict the oldest entries beyond the retention limit.
    async fn insert_and_trim_log(&self, entry: &LogEntry) -> Result<LogEntry>;

    /// Logs of a task, newest first.
    async fn read_logs(&self, task_id: i64) -> Result<Vec<LogEntry>>;

    async fn delete_logs(&self, task_id: i64) -> Result<()>;
}
