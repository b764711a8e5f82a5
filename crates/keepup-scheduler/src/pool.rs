//! In-flight executions keyed by generation id.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// A cancellable probe execution.
pub trait ExecutionHandle: Send + Sync {
    /// Cancel the execution. A no-op once it is done.
    fn cancel(&self);
    fn is_done(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

/// Handle to a spawned tokio task that observes `token` cooperatively.
pub struct TokioExecutionHandle {
    token: CancellationToken,
    task: AbortHandle,
}

impl TokioExecutionHandle {
    pub fn new(token: CancellationToken, task: AbortHandle) -> Self {
        Self { token, task }
    }
}

impl ExecutionHandle for TokioExecutionHandle {
    fn cancel(&self) {
        if !self.task.is_finished() {
            self.token.cancel();
        }
    }

    fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of in-flight executions per generation id.
///
/// Finished handles are pruned lazily on every [`cancel`](Self::cancel).
#[derive(Default)]
pub struct ProcessPool {
    entries: Mutex<HashMap<i32, Vec<Box<dyn ExecutionHandle>>>>,
}

impl ProcessPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self, scheduler_id: i32, handle: Box<dyn ExecutionHandle>) {
        let mut entries = self.lock();
        entries.entry(scheduler_id).or_default().push(handle);
    }

    /// Cancel every unfinished handle of `scheduler_id`, then drop finished
    /// and cancelled handles of all ids.
    pub fn cancel(&self, scheduler_id: i32) {
        let mut entries = self.lock();
        if let Some(handles) = entries.get(&scheduler_id) {
            for handle in handles.iter().filter(|h| !h.is_done()) {
                handle.cancel();
            }
        }
        entries.retain(|_, handles| {
            handles.retain(|h| !h.is_done() && !h.is_cancelled());
            !handles.is_empty()
        });
    }

    /// Generation ids with at least one live handle.
    pub fn active_ids(&self) -> Vec<i32> {
        self.lock()
            .iter()
            .filter(|(_, handles)| handles.iter().any(|h| !h.is_done() && !h.is_cancelled()))
            .map(|(id, _)| *id)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Vec<Box<dyn ExecutionHandle>>>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
