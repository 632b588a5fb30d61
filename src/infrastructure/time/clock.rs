//! Time source implementations
//!
//! The engine only ever sees the `TimeSource` port. `SystemTimeSource` is
//! the real thing; `VirtualTimeSource` lets tests advance wall-clock time
//! deterministically. The virtual source uses a std lock (not tokio) so it
//! can be read from both sync and async contexts.

use std::sync::RwLock;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use crate::application::engine::ports::TimeSource;

/// Local wall-clock time backed by the system clock.
pub struct SystemTimeSource;

#[async_trait]
impl TimeSource for SystemTimeSource {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep_until(&self, deadline: NaiveDateTime) {
        let now = self.now();
        if deadline <= now {
            return;
        }
        let delta = (deadline - now)
            .to_std()
            .unwrap_or(StdDuration::from_secs(0));
        tokio::time::sleep(delta).await;
    }
}

/// Deterministic time for tests: only moves when told to.
pub struct VirtualTimeSource {
    now: RwLock<NaiveDateTime>,
}

impl VirtualTimeSource {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Moves the clock forward to the given instant. Moving backwards is a
    /// test bug and panics.
    pub fn set(&self, instant: NaiveDateTime) {
        let mut now = self.now.write().unwrap();
        assert!(instant >= *now, "virtual time may not move backwards");
        *now = instant;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.write().unwrap();
        *now += delta;
    }
}

#[async_trait]
impl TimeSource for VirtualTimeSource {
    fn now(&self) -> NaiveDateTime {
        *self.now.read().unwrap()
    }

    async fn sleep_until(&self, deadline: NaiveDateTime) {
        // Virtual sleep completes instantly, advancing the clock.
        let mut now = self.now.write().unwrap();
        if deadline > *now {
            *now = deadline;
        }
    }
}
