//! SQLite-backed task and log storage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use keepup_types::{LogEntry, NetworkTask};

use crate::{Result, TaskStore};

/// Default number of log entries retained per task.
pub const DEFAULT_LOG_LIMIT: usize = 100;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS network_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scheduler_id INTEGER NOT NULL,
        display_index INTEGER NOT NULL,
        address TEXT NOT NULL,
        port INTEGER NOT NULL,
        access_type TEXT NOT NULL,
        interval_minutes INTEGER NOT NULL,
        wifi_only INTEGER NOT NULL DEFAULT 0,
        notify_on_failure INTEGER NOT NULL DEFAULT 0,
        high_priority INTEGER NOT NULL DEFAULT 0,
        running INTEGER NOT NULL DEFAULT 0,
        instances INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_scheduled INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS log_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        success INTEGER NOT NULL,
        message TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_log_entries_task ON log_entries(task_id, timestamp);";

const TASK_COLUMNS: &str = "id, scheduler_id, display_index, address, port, access_type, interval_minutes,
     wifi_only, notify_on_failure, high_priority, running, instances, failure_count, last_scheduled";

/// SQLite-based storage for tasks and logs.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    log_limit: usize,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            log_limit: DEFAULT_LOG_LIMIT,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            log_limit: DEFAULT_LOG_LIMIT,
        })
    }

    /// Override the per-task log retention limit.
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit.max(1);
        self
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let value = tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await??;
        Ok(value)
    }

    async fn execute(&self, sql: &'static str, id: i64) -> Result<()> {
        self.with_conn(move |conn| conn.execute(sql, rusqlite::params![id]).map(|_| ()))
            .await
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<NetworkTask> {
    Ok(NetworkTask {
        id: row.get(0)?,
        scheduler_id: row.get(1)?,
        index: row.get(2)?,
        address: row.get(3)?,
        port: row.get(4)?,
        access_type: row.get::<_, String>(5)?.parse().unwrap_or_default(),
        interval_minutes: row.get(6)?,
        wifi_only: row.get::<_, i32>(7)? != 0,
        notify_on_failure: row.get::<_, i32>(8)? != 0,
        high_priority: row.get::<_, i32>(9)? != 0,
        running: row.get::<_, i32>(10)? != 0,
        instances: row.get(11)?,
        failure_count: row.get(12)?,
        last_scheduled: row.get(13)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        timestamp: row.get(2)?,
        success: row.get::<_, i32>(3)? != 0,
        message: row.get(4)?,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_task(&self, task: &NetworkTask) -> Result<NetworkTask> {
        let mut task = task.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO network_tasks
                    (scheduler_id, display_index, address, port, access_type, interval_minutes,
                     wifi_only, notify_on_failure, high_priority, running, instances, failure_count, last_scheduled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    task.scheduler_id,
                    task.index,
                    task.address,
                    task.port,
                    task.access_type.as_str(),
                    task.interval_minutes,
                    task.wifi_only as i32,
                    task.notify_on_failure as i32,
                    task.high_priority as i32,
                    task.running as i32,
                    task.instances,
                    task.failure_count,
                    task.last_scheduled,
                ],
            )?;
            task.id = conn.last_insert_rowid();
            Ok(task)
        })
        .await
    }

    async fn read_task(&self, id: i64) -> Result<Option<NetworkTask>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM network_tasks WHERE id = ?1"),
                rusqlite::params![id],
                task_from_row,
            )
            .optional()
        })
        .await
    }

    async fn read_task_by_scheduler_id(&self, scheduler_id: i32) -> Result<Option<NetworkTask>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM network_tasks WHERE scheduler_id = ?1
                     ORDER BY running DESC LIMIT 1"
                ),
                rusqlite::params![scheduler_id],
                task_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_tasks(&self) -> Result<Vec<NetworkTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM network_tasks ORDER BY display_index, id"
            ))?;
            let rows = stmt
                .query_map([], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_running_tasks(&self) -> Result<Vec<NetworkTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM network_tasks WHERE running = 1 ORDER BY display_index, id"
            ))?;
            let rows = stmt
                .query_map([], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_task(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM log_entries WHERE task_id = ?1",
                rusqlite::params![id],
            )?;
            let count = tx.execute(
                "DELETE FROM network_tasks WHERE id = ?1",
                rusqlite::params![id],
            )?;
            tx.commit()?;
            Ok(count > 0)
        })
        .await
    }

    async fn update_running(&self, id: i64, running: bool) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE network_tasks SET running = ?1 WHERE id = ?2",
                rusqlite::params![running as i32, id],
            )
            .map(|_| ())
        })
        .await
    }

    async fn update_scheduler_id(&self, id: i64, scheduler_id: i32) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE network_tasks SET scheduler_id = ?1 WHERE id = ?2",
                rusqlite::params![scheduler_id, id],
            )
            .map(|_| ())
        })
        .await
    }

    async fn update_last_scheduled(&self, id: i64, timestamp: i64) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE network_tasks SET last_scheduled = ?1 WHERE id = ?2",
                rusqlite::params![timestamp, id],
            )
            .map(|_| ())
        })
        .await
    }

    async fn increment_instances(&self, id: i64) -> Result<()> {
        self.execute(
            "UPDATE network_tasks SET instances = instances + 1 WHERE id = ?1",
            id,
        )
        .await
    }

    async fn decrement_instances(&self, id: i64) -> Result<()> {
        self.execute(
            "UPDATE network_tasks SET instances = MAX(instances - 1, 0) WHERE id = ?1",
            id,
        )
        .await
    }

    async fn reset_instances(&self, id: i64) -> Result<()> {
        self.execute("UPDATE network_tasks SET instances = 0 WHERE id = ?1", id)
            .await
    }

    async fn reset_all_instances(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE network_tasks SET instances = 0", [])
                .map(|_| ())
        })
        .await
    }

    async fn increment_failure_count(&self, id: i64) -> Result<i32> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE network_tasks SET failure_count = failure_count + 1 WHERE id = ?1",
                rusqlite::params![id],
            )?;
            let count = tx
                .query_row(
                    "SELECT failure_count FROM network_tasks WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn reset_failure_count(&self, id: i64) -> Result<()> {
        self.execute(
            "UPDATE network_tasks SET failure_count = 0 WHERE id = ?1",
            id,
        )
        .await
    }

    async fn insert_and_trim_log(&self, entry: &LogEntry) -> Result<LogEntry> {
        let mut entry = entry.clone();
        let limit = self.log_limit as i64;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO log_entries (task_id, timestamp, success, message)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    entry.task_id,
                    entry.timestamp,
                    entry.success as i32,
                    entry.message,
                ],
            )?;
            entry.id = tx.last_insert_rowid();
            tx.execute(
                "DELETE FROM log_entries WHERE task_id = ?1 AND id NOT IN (
                     SELECT id FROM log_entries WHERE task_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?2
                 )",
                rusqlite::params![entry.task_id, limit],
            )?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn read_logs(&self, task_id: i64) -> Result<Vec<LogEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, timestamp, success, message FROM log_entries
                 WHERE task_id = ?1 ORDER BY timestamp DESC, id DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![task_id], log_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_logs(&self, task_id: i64) -> Result<()> {
        self.execute("DELETE FROM log_entries WHERE task_id = ?1", task_id)
            .await
    }
}
