//! Dense generation id allocation.

use std::collections::HashSet;

use keepup_storage::{Result, TaskStore};

use crate::pool::ProcessPool;

/// Smallest positive integer not in `used`.
fn smallest_excluded(used: impl IntoIterator<Item = i32>) -> i32 {
    let used: HashSet<i32> = used.into_iter().collect();
    (1..).find(|id| !used.contains(id)).unwrap_or(1)
}

/// Issues generation ids for (re)armed tasks.
///
/// Ids held by running tasks or by executions still in the pool are never
/// reissued; ids of stopped tasks are reclaimed.
pub struct SchedulerIdGenerator;

impl SchedulerIdGenerator {
    pub async fn next(store: &dyn TaskStore, pool: &ProcessPool) -> Result<i32> {
        let running = store.list_running_tasks().await?;
        let active = running
            .iter()
            .map(|task| task.scheduler_id)
            .chain(pool.active_ids());
        Ok(smallest_excluded(active))
    }
}

/// Issues the initial generation id of a newly created task.
pub struct NetworkTaskIdGenerator;

impl NetworkTaskIdGenerator {
    pub async fn next(store: &dyn TaskStore) -> Result<i32> {
        let tasks = store.list_tasks().await?;
        Ok(smallest_excluded(tasks.iter().map(|task| task.scheduler_id)))
    }
}

#[cfg(test)]
mod tests {
    use keepup_storage::SqliteStore;
    use keepup_types::{AccessType, NetworkTask};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::pool::TokioExecutionHandle;

    #[test]
    fn test_smallest_excluded() {
        assert_eq!(smallest_excluded([]), 1);
        assert_eq!(smallest_excluded([1, 2, 3]), 4);
        assert_eq!(smallest_excluded([2, 3]), 1);
        assert_eq!(smallest_excluded([1, 3, 4]), 2);
        assert_eq!(smallest_excluded([0, -1, 1]), 2);
    }

    async fn insert(store: &SqliteStore, scheduler_id: i32, running: bool) {
        let mut task = NetworkTask::new("example.com", 80, AccessType::Ping);
        task.scheduler_id = scheduler_id;
        task.running = running;
        store.insert_task(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_ids_skip_running_and_pooled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let pool = ProcessPool::new();
        insert(&store, 1, true).await;
        insert(&store, 2, false).await;
        assert_eq!(SchedulerIdGenerator::next(&store, &pool).await.unwrap(), 2);

        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { child.cancelled().await });
        pool.pool(2, Box::new(TokioExecutionHandle::new(token.clone(), task.abort_handle())));
        assert_eq!(SchedulerIdGenerator::next(&store, &pool).await.unwrap(), 3);

        pool.cancel(2);
        assert_eq!(SchedulerIdGenerator::next(&store, &pool).await.unwrap(), 2);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_ids_skip_all_persisted() {
        let store = SqliteStore::open_in_memory().unwrap();
        insert(&store, 1, true).await;
        insert(&store, 2, false).await;
        assert_eq!(NetworkTaskIdGenerator::next(&store).await.unwrap(), 3);
    }
}
