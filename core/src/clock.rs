use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of timestamps for `createdAt` / `updatedAt` / `lastModified`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests that need exact timestamps.
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Next mutation timestamp: `now`, unless the clock has not moved past `prior`,
/// in which case one microsecond after `prior`.
pub fn next_timestamp(prior: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > prior {
        now
    } else {
        prior + Duration::microseconds(1)
    }
}
