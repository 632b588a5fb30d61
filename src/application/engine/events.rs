//! Engine events
//!
//! The main loop consumes a single event queue. Signal handlers and child
//! waiters never touch scheduler state; they only post events here.

use crate::domain::entities::ExitDisposition;

/// A child process (or its stand-in) finished.
#[derive(Debug, Clone)]
pub struct JobEnded {
    pub job_id: String,
    pub seq: u64,
    /// Queue the instance was running in, so the end can be attributed
    /// without a global scan.
    pub queue: String,
    pub disposition: ExitDisposition,
    /// Captured stdout and stderr, already bounded by the supervisor.
    pub output: String,
}

/// Operator requests delivered via signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// `SIGHUP`: re-read the catalog.
    Reload,
    /// `SIGUSR1`: write the full scheduler state to the log.
    DumpState,
    /// `SIGTERM` / `SIGINT`: orderly shutdown.
    Shutdown,
}

/// Everything the main loop can be woken by, besides the minute tick.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    JobEnded(JobEnded),
    Control(ControlEvent),
}
