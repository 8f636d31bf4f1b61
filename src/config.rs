use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Cleanup engine configuration.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How far in the future a force-escalation backstop task is
    /// scheduled. A stalled graceful teardown gets this long before the
    /// forced variant runs.
    pub force_timeout: Duration,
}

impl CleanupConfig {
    pub fn new() -> Self {
        Self {
            force_timeout: Duration::from_secs(60),
        }
    }

    pub fn force_timeout(mut self, timeout: Duration) -> Self {
        self.force_timeout = timeout;
        self
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Time source for due-time decisions. The engine never calls
/// `Utc::now()` directly so deadlines stay testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
