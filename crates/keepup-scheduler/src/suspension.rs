//! Quiet-hour windows that stretch the delay of the next trigger.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};

use keepup_types::SuspensionInterval;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Source of the local wall-clock time.
pub trait Clock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

/// Evaluates the configured suspension intervals.
#[derive(Default)]
pub struct SuspensionScheduler {
    intervals: RwLock<Vec<SuspensionInterval>>,
}

impl SuspensionScheduler {
    pub fn new(intervals: Vec<SuspensionInterval>) -> Self {
        Self {
            intervals: RwLock::new(intervals),
        }
    }

    /// Replace the intervals, e.g. after a configuration reload.
    pub fn set_intervals(&self, intervals: Vec<SuspensionInterval>) {
        *self.intervals.write().unwrap_or_else(|e| e.into_inner()) = intervals;
    }

    pub fn intervals(&self) -> Vec<SuspensionInterval> {
        self.intervals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_suspended(&self, now: NaiveTime) -> bool {
        self.intervals().iter().any(|interval| interval.contains(now))
    }

    /// Time until the latest end among the intervals containing `now`.
    pub fn delay_until_end(&self, now: NaiveTime) -> Option<Duration> {
        self.intervals()
            .iter()
            .filter(|interval| interval.contains(now))
            .map(|interval| seconds_until(now, interval.end))
            .max()
            .map(|secs| Duration::from_secs(secs as u64))
    }

    /// Delay of the next trigger: `interval`, unless currently suspended.
    pub fn next_delay(&self, interval: Duration, now: NaiveTime) -> Duration {
        self.delay_until_end(now).unwrap_or(interval)
    }
}

/// Seconds from `from` forward to `to`, wrapping past midnight.
fn seconds_until(from: NaiveTime, to: NaiveTime) -> i64 {
    let diff = i64::from(to.num_seconds_from_midnight()) - i64::from(from.num_seconds_from_midnight());
    diff.rem_euclid(SECS_PER_DAY)
}
