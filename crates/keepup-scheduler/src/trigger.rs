//! Delayed triggers keyed by generation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

/// Payload delivered when an armed trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub task_id: i64,
    pub scheduler_id: i32,
}

/// A platform capable of delivering a [`Trigger`] after a delay.
///
/// At most one trigger is armed per generation id. Delivery is not ordered
/// against a concurrent `disarm`, so receivers must revalidate.
pub trait TriggerPlatform: Send + Sync {
    /// Arm `trigger`, replacing any trigger armed under the same id.
    fn arm(&self, trigger: Trigger, delay: Duration);
    fn disarm(&self, scheduler_id: i32);
    fn is_armed(&self, scheduler_id: i32) -> bool;
}

type Timers = Arc<Mutex<HashMap<i32, (u64, AbortHandle)>>>;

/// Tokio timers delivering fired triggers over an mpsc channel.
pub struct TokioTriggers {
    timers: Timers,
    next_seq: Mutex<u64>,
    sender: mpsc::UnboundedSender<Trigger>,
}

impl TokioTriggers {
    /// Create the platform and the receiving end for fired triggers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let triggers = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_seq: Mutex::new(0),
            sender,
        };
        (triggers, receiver)
    }

    fn timers(timers: &Timers) -> std::sync::MutexGuard<'_, HashMap<i32, (u64, AbortHandle)>> {
        timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TriggerPlatform for TokioTriggers {
    fn arm(&self, trigger: Trigger, delay: Duration) {
        let seq = {
            let mut next = self.next_seq.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let timers = self.timers.clone();
        let sender = self.sender.clone();

        let mut map = Self::timers(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = Self::timers(&timers);
                // Replaced or disarmed in the meantime.
                if map.get(&trigger.scheduler_id).map(|(s, _)| *s) != Some(seq) {
                    return;
                }
                map.remove(&trigger.scheduler_id);
            }
            if sender.send(trigger).is_err() {
                debug!(scheduler_id = trigger.scheduler_id, "Trigger receiver closed");
            }
        });
        if let Some((_, previous)) = map.insert(trigger.scheduler_id, (seq, handle.abort_handle())) {
            previous.abort();
        }
        debug!(
            task_id = trigger.task_id,
            scheduler_id = trigger.scheduler_id,
            delay_ms = delay.as_millis() as u64,
            "Trigger armed"
        );
    }

    fn disarm(&self, scheduler_id: i32) {
        if let Some((_, handle)) = Self::timers(&self.timers).remove(&scheduler_id) {
            handle.abort();
            debug!(scheduler_id, "Trigger disarmed");
        }
    }

    fn is_armed(&self, scheduler_id: i32) -> bool {
        Self::timers(&self.timers).contains_key(&scheduler_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(task_id: i64, scheduler_id: i32) -> Trigger {
        Trigger {
            task_id,
            scheduler_id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (triggers, mut rx) = TokioTriggers::new();
        triggers.arm(trigger(7, 1), Duration::from_secs(60));
        assert!(triggers.is_armed(1));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, trigger(7, 1));
        assert!(!triggers.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_delivery() {
        let (triggers, mut rx) = TokioTriggers::new();
        triggers.arm(trigger(7, 1), Duration::from_secs(60));
        triggers.disarm(1);
        assert!(!triggers.is_armed(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_timer() {
        let (triggers, mut rx) = TokioTriggers::new();
        triggers.arm(trigger(7, 1), Duration::from_secs(600));
        triggers.arm(trigger(7, 1), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(rx.try_recv().unwrap(), trigger(7, 1));
        assert!(rx.try_recv().is_err());
    }
}
