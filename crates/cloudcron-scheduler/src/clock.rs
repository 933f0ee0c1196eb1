use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, NaiveDateTime, Timelike};
use cloudcron_core::config::TimezoneMode;

/// Source of the wall-clock time cron expressions are evaluated against.
pub trait Clock: Send + Sync {
    /// Current time, truncated to the second.
    fn now(&self) -> NaiveDateTime;
}

/// Reads the system clock in UTC or server-local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    mode: TimezoneMode,
}

impl SystemClock {
    pub fn new(mode: TimezoneMode) -> Self {
        Self { mode }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = match self.mode {
            TimezoneMode::Utc => chrono::Utc::now().naive_utc(),
            TimezoneMode::Local => chrono::Local::now().naive_local(),
        };
        truncate_to_second(now)
    }
}

/// Clock that only moves when told to. Shared between clones.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(truncate_to_second(start))),
        }
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = truncate_to_second(to);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}
