//! Task scheduler: arms triggers, runs probes, and recovers after restart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keepup_probe::{NetworkTaskWorker, is_current};
use keepup_storage::{StorageError, TaskStore};
use keepup_types::{LogEntry, NetworkTask};

use crate::ids::{NetworkTaskIdGenerator, SchedulerIdGenerator};
use crate::pool::{ProcessPool, TokioExecutionHandle};
use crate::suspension::{Clock, SuspensionScheduler, SystemClock};
use crate::trigger::{Trigger, TriggerPlatform};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Task {0} not found")]
    TaskNotFound(i64),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Outcome of one fired trigger, resolved when the probe completes.
pub type Execution = JoinHandle<Result<Option<LogEntry>>>;

/// State guarded by the control lock.
#[derive(Default)]
struct Control {
    /// Generations stopped by `terminate` whose triggers may still be queued.
    terminated: HashSet<i32>,
}

/// Owns generation-id issuance and the `running` flag of every task.
///
/// All scheduling decisions go through one control lock; probe executions
/// run outside it, bounded by a semaphore.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    worker: Arc<NetworkTaskWorker>,
    triggers: Arc<dyn TriggerPlatform>,
    pool: ProcessPool,
    suspension: Arc<SuspensionScheduler>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    control: Mutex<Control>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        worker: NetworkTaskWorker,
        triggers: Arc<dyn TriggerPlatform>,
        suspension: Arc<SuspensionScheduler>,
        max_concurrent_probes: usize,
    ) -> Self {
        Self {
            store,
            worker: Arc::new(worker),
            triggers,
            pool: ProcessPool::new(),
            suspension,
            clock: Arc::new(SystemClock),
            permits: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
            control: Mutex::new(Control::default()),
        }
    }

    /// Replace the wall clock used for suspension decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn suspension(&self) -> &Arc<SuspensionScheduler> {
        &self.suspension
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    // ─── Task lifecycle ─────────────────────────────────────

    /// Persist a new, stopped task with its initial generation id and the
    /// next display index.
    pub async fn add_task(&self, task: &NetworkTask) -> Result<NetworkTask> {
        let _guard = self.control.lock().await;
        let existing = self.store.list_tasks().await?;
        let mut task = task.clone();
        task.scheduler_id = NetworkTaskIdGenerator::next(self.store.as_ref()).await?;
        task.index = existing.iter().map(|t| t.index).max().map_or(0, |i| i + 1);
        task.running = false;
        task.instances = 0;
        task.failure_count = 0;
        let task = self.store.insert_task(&task).await?;
        info!(task_id = task.id, address = %task.address, "Task added");
        Ok(task)
    }

    /// Delete a task with its logs, then cancel its executions. Returns false
    /// if it did not exist.
    pub async fn remove_task(&self, id: i64) -> Result<bool> {
        let mut control = self.control.lock().await;
        let Some(task) = self.store.read_task(id).await? else {
            return Ok(false);
        };
        // Delete first so a cancelled probe finds the task gone.
        let removed = self.store.delete_task(id).await?;
        self.triggers.disarm(task.scheduler_id);
        self.pool.cancel(task.scheduler_id);
        control.terminated.remove(&task.scheduler_id);
        info!(task_id = id, "Task removed");
        Ok(removed)
    }

    // ─── Scheduling ─────────────────────────────────────────

    /// Start a stopped task under a fresh generation id and fire it at once.
    ///
    /// A task that is already running is returned unchanged; use
    /// [`reschedule`](Self::reschedule) for those.
    pub async fn schedule(&self, task: &NetworkTask) -> Result<NetworkTask> {
        let mut control = self.control.lock().await;
        let mut current = self.read(task.id).await?;
        if current.running {
            debug!(task_id = task.id, "Task already running, not scheduling");
            return Ok(current);
        }

        let scheduler_id = SchedulerIdGenerator::next(self.store.as_ref(), &self.pool).await?;
        self.store.update_scheduler_id(task.id, scheduler_id).await?;
        self.store.update_running(task.id, true).await?;
        current.scheduler_id = scheduler_id;
        current.running = true;

        self.arm(
            &mut control,
            Trigger {
                task_id: task.id,
                scheduler_id,
            },
            Duration::ZERO,
        );
        info!(task_id = task.id, scheduler_id, "Task scheduled");
        Ok(current)
    }

    /// Move a running task to a fresh generation id.
    ///
    /// A stopped task is cancelled instead. A snapshot whose generation id no
    /// longer matches the stored one is returned unchanged. With
    /// `force_rearm` the new generation fires at once, otherwise after the
    /// task interval (stretched by an active suspension).
    pub async fn reschedule(&self, task: &NetworkTask, force_rearm: bool) -> Result<NetworkTask> {
        let mut control = self.control.lock().await;
        let mut current = self.read(task.id).await?;
        if !current.running {
            return self.stop_locked(&mut control, task.id, false).await;
        }
        if current.scheduler_id != task.scheduler_id {
            debug!(
                task_id = task.id,
                snapshot = task.scheduler_id,
                current = current.scheduler_id,
                "Stale reschedule ignored"
            );
            return Ok(task.clone());
        }

        let previous = current.scheduler_id;
        self.triggers.disarm(previous);

        let scheduler_id = SchedulerIdGenerator::next(self.store.as_ref(), &self.pool).await?;
        let delay = if force_rearm {
            Duration::ZERO
        } else {
            self.next_delay(&current)
        };
        self.store.update_scheduler_id(task.id, scheduler_id).await?;
        self.pool.cancel(previous);
        current.scheduler_id = scheduler_id;
        self.arm(
            &mut control,
            Trigger {
                task_id: task.id,
                scheduler_id,
            },
            delay,
        );
        info!(task_id = task.id, previous, scheduler_id, "Task rescheduled");
        Ok(current)
    }

    /// Stop a task: disarm, cancel its executions and clear `running`.
    pub async fn cancel(&self, task: &NetworkTask) -> Result<NetworkTask> {
        let mut control = self.control.lock().await;
        self.stop_locked(&mut control, task.id, false).await
    }

    /// Disarm and cancel like [`cancel`](Self::cancel) but keep `running`,
    /// so the next [`startup`](Self::startup) resumes the task. Triggers of
    /// the terminated generation that are already queued are discarded.
    pub async fn terminate(&self, task: &NetworkTask) -> Result<NetworkTask> {
        let mut control = self.control.lock().await;
        self.stop_locked(&mut control, task.id, true).await
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        self.stop_all(false).await
    }

    pub async fn terminate_all(&self) -> Result<usize> {
        self.stop_all(true).await
    }

    /// Recover after a restart. Clears stale instance counts and arms an
    /// immediate trigger for every running task that has none. Returns the
    /// number of triggers armed.
    pub async fn startup(&self) -> Result<usize> {
        let mut control = self.control.lock().await;
        self.store.reset_all_instances().await?;
        control.terminated.clear();
        let armed = self.arm_unarmed(&mut control).await?;
        info!(armed, "Scheduler startup complete");
        Ok(armed)
    }

    /// Arm running tasks that have no trigger, e.g. tasks started by another
    /// process sharing the database. Terminated tasks stay unarmed.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut control = self.control.lock().await;
        let armed = self.arm_unarmed(&mut control).await?;
        if armed > 0 {
            info!(armed, "Armed tasks started elsewhere");
        }
        Ok(armed)
    }

    async fn arm_unarmed(&self, control: &mut Control) -> Result<usize> {
        let mut armed = 0;
        for task in self.store.list_running_tasks().await? {
            if self.triggers.is_armed(task.scheduler_id)
                || control.terminated.contains(&task.scheduler_id)
            {
                continue;
            }
            self.arm(
                control,
                Trigger {
                    task_id: task.id,
                    scheduler_id: task.scheduler_id,
                },
                Duration::ZERO,
            );
            armed += 1;
        }
        Ok(armed)
    }

    // ─── Trigger handling ───────────────────────────────────

    /// Handle a fired trigger.
    ///
    /// Stale triggers are dropped without side effects. Otherwise the next
    /// trigger is armed under the same generation id and the probe is
    /// started; the returned handle resolves to the persisted log entry.
    pub async fn on_trigger(&self, trigger: Trigger) -> Result<Option<Execution>> {
        let control = self.control.lock().await;
        let task = match self.store.read_task(trigger.task_id).await? {
            Some(task)
                if task.running
                    && task.scheduler_id == trigger.scheduler_id
                    && !control.terminated.contains(&trigger.scheduler_id) =>
            {
                task
            }
            _ => {
                debug!(
                    task_id = trigger.task_id,
                    scheduler_id = trigger.scheduler_id,
                    "Stale trigger discarded"
                );
                return Ok(None);
            }
        };

        self.triggers.arm(trigger, self.next_delay(&task));
        self.store
            .update_last_scheduled(task.id, chrono::Utc::now().timestamp_millis())
            .await?;
        self.store.increment_instances(task.id).await?;

        let token = CancellationToken::new();
        let execution = tokio::spawn(Self::execute(
            self.store.clone(),
            self.worker.clone(),
            self.permits.clone(),
            task.clone(),
            token.clone(),
        ));
        self.pool.pool(
            task.scheduler_id,
            Box::new(TokioExecutionHandle::new(token, execution.abort_handle())),
        );
        debug!(task_id = task.id, scheduler_id = task.scheduler_id, "Probe started");
        Ok(Some(execution))
    }

    async fn execute(
        store: Arc<dyn TaskStore>,
        worker: Arc<NetworkTaskWorker>,
        permits: Arc<Semaphore>,
        task: NetworkTask,
        token: CancellationToken,
    ) -> Result<Option<LogEntry>> {
        let permit = tokio::select! {
            _ = token.cancelled() => None,
            permit = permits.acquire_owned() => permit.ok(),
        };
        let outcome = match permit {
            Some(_permit) => worker.execute(&task, &token).await,
            None => Ok(None),
        };
        store.decrement_instances(task.id).await?;
        let Some(entry) = outcome? else {
            return Ok(None);
        };
        if !is_current(store.as_ref(), &task).await? {
            debug!(
                task_id = task.id,
                scheduler_id = task.scheduler_id,
                "Task deleted or superseded during probe, dropping log entry"
            );
            return Ok(None);
        }
        Ok(Some(worker.persist(&task, &entry).await?))
    }

    /// Consume fired triggers until `shutdown` is cancelled or the channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<Trigger>,
        shutdown: CancellationToken,
    ) {
        info!("Scheduler started");
        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                trigger = receiver.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            match self.on_trigger(trigger).await {
                Ok(Some(execution)) => {
                    tokio::spawn(async move {
                        match execution.await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => error!(task_id = trigger.task_id, "Probe cycle failed: {e}"),
                            Err(e) if e.is_cancelled() => {}
                            Err(e) => error!(task_id = trigger.task_id, "Probe task panicked: {e}"),
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => error!(task_id = trigger.task_id, "Failed to handle trigger: {e}"),
            }
        }
        info!("Scheduler stopped");
    }

    // ─── Helpers ────────────────────────────────────────────

    async fn read(&self, id: i64) -> Result<NetworkTask> {
        self.store
            .read_task(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))
    }

    fn next_delay(&self, task: &NetworkTask) -> Duration {
        let interval = Duration::from_secs(u64::from(task.interval_minutes.max(1)) * 60);
        let delay = self
            .suspension
            .next_delay(interval, self.clock.time_of_day());
        if delay != interval {
            debug!(task_id = task.id, delay_secs = delay.as_secs(), "Suspended, delaying next probe");
        }
        delay
    }

    fn arm(&self, control: &mut Control, trigger: Trigger, delay: Duration) {
        control.terminated.remove(&trigger.scheduler_id);
        self.triggers.arm(trigger, delay);
    }

    async fn stop_locked(
        &self,
        control: &mut Control,
        id: i64,
        keep_running: bool,
    ) -> Result<NetworkTask> {
        let mut current = self.read(id).await?;
        self.triggers.disarm(current.scheduler_id);
        self.pool.cancel(current.scheduler_id);
        if keep_running {
            control.terminated.insert(current.scheduler_id);
        }
        if !keep_running && current.running {
            self.store.update_running(id, false).await?;
            current.running = false;
        }
        if keep_running {
            debug!(task_id = id, scheduler_id = current.scheduler_id, "Task terminated");
        } else {
            info!(task_id = id, scheduler_id = current.scheduler_id, "Task cancelled");
        }
        Ok(current)
    }

    async fn stop_all(&self, keep_running: bool) -> Result<usize> {
        let mut control = self.control.lock().await;
        let tasks = self.store.list_tasks().await?;
        for task in &tasks {
            if let Err(e) = self.stop_locked(&mut control, task.id, keep_running).await {
                warn!(task_id = task.id, "Failed to stop task: {e}");
            }
        }
        Ok(tasks.len())
    }
}
