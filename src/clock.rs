//! Time abstraction for the sync collection.
//!
//! Grace-period undo and refresh retries both depend on elapsed time. Timers
//! as implicit control flow are hard to test, so time is injected behind a
//! trait: [`SystemClock`] for production, [`ManualClock`] for tests that must
//! not wait on the wall clock.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of time for the collection
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Wait for the given duration before resuming
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real time: `Utc::now` and tokio's timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time, advanced explicitly.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately, so retry loops and undo windows run in microseconds under
/// test while still observing the same ordering as real time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::milliseconds(duration.as_millis() as i64);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl<T: Clock> Clock for std::sync::Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
