//! Engine ports
//!
//! Trait seams between the scheduling engine and the outside world: time,
//! process launching, and mail. Production implementations live in the
//! infrastructure layer; tests substitute deterministic fakes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::domain::entities::Job;

/// Injectable time: the engine never reads the system clock directly, so
/// tests can advance virtual time and observe effects deterministically.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Suspends until the deadline; interrupted externally by selecting
    /// against the event queue.
    async fn sleep_until(&self, deadline: NaiveDateTime);
}

/// Everything the supervisor needs to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job: Arc<Job>,
    pub seq: u64,
    pub queue: String,
    pub scheduled_at: NaiveDateTime,
}

/// Returned by a successful spawn.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    /// Child pid; `None` for launchers that do not fork (test fakes).
    pub pid: Option<u32>,
}

/// Child-process supervision seam.
///
/// `spawn` must deliver exactly one `JobEnded` event for the instance, by
/// whatever route the implementation uses to watch its children.
pub trait Launcher: Send {
    fn spawn(&mut self, request: &LaunchRequest) -> Result<LaunchHandle>;

    /// Requests termination of a running instance: graceful signal to the
    /// process group, stronger signal after the grace period. The end is
    /// still reported through the usual `JobEnded` event.
    fn kill(&mut self, job_id: &str, seq: u64, pid: Option<u32>) -> Result<()>;

    /// Runs a job's condition synchronously, suspending the engine.
    /// `Ok(true)` means the command may start.
    fn run_condition(&mut self, job: &Job) -> Result<bool>;
}

/// A fully-built mail, ready for the transport.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Sendmail-compatible binary to post the message through.
    pub sendmail: String,
}

/// Mail delivery seam.
pub trait MailTransport: Send {
    fn deliver(&self, message: &MailMessage) -> Result<()>;
}

/// Account identity used for mail defaults.
#[derive(Debug, Clone)]
pub struct MailIdentity {
    pub username: String,
    pub hostname: String,
}
