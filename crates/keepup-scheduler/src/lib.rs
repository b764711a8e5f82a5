//! keepup-scheduler: arms per-task triggers, runs probes through a
//! cancellable process pool, and recovers scheduling state after restart.

pub mod ids;
pub mod pool;
pub mod scheduler;
pub mod suspension;
pub mod trigger;

pub use ids::{NetworkTaskIdGenerator, SchedulerIdGenerator};
pub use pool::{ExecutionHandle, ProcessPool, TokioExecutionHandle};
pub use scheduler::{Scheduler, SchedulerError};
pub use suspension::{Clock, SuspensionScheduler, SystemClock};
pub use trigger::{TokioTriggers, Trigger, TriggerPlatform};
