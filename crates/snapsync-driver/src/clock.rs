//! Time source used for snapshot naming
//!
//! Snapshot names have second resolution, so the driver needs to read the
//! current time and to wait for the next whole second when a name is taken.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of wall-clock time
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Wait until `deadline` has passed
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// The first whole second strictly after `at`
pub fn next_second(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at
        .duration_trunc(ChronoDuration::seconds(1))
        .unwrap_or(at);
    truncated + ChronoDuration::seconds(1)
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline - Utc::now();
        if let Ok(remaining) = remaining.to_std() {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// Clock that only moves when told to
///
/// `sleep_until` returns immediately and moves the clock forward to the
/// deadline, so waiting for the next second costs nothing in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Set the current time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Move the clock forward
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if *now < deadline {
            *now = deadline;
        }
    }
}
