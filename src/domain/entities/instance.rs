//! Instance entity module
//!
//! An instance is one scheduled execution of a job: created when the job
//! fires, queued, possibly started, and finally ended. Instances carry a
//! per-job monotonic sequence number so log lines and end events can be
//! correlated unambiguously.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::job::Job;

/// Lifecycle states of an instance.
///
/// `pending` — in a queue, not yet at the head; `ready` — queue head,
/// condition not yet evaluated; `running` — child process alive; `ended` —
/// awaiting post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Ready,
    Running,
    Ended,
}

/// How an instance ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitDisposition {
    /// The command exited on its own with this code.
    Exited(i32),
    /// The command was terminated by a signal not sent by the engine.
    Signaled(i32),
    /// The engine terminated the instance (kill conflict or shutdown).
    Killed,
    /// The instance failed before the command ran (environment setup,
    /// spawn failure).
    Error(String),
    /// The engine was not running when the instance ended; status lost.
    Unknown,
}

impl ExitDisposition {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitDisposition::Exited(0))
    }
}

impl fmt::Display for ExitDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitDisposition::Exited(0) => write!(f, "ok"),
            ExitDisposition::Exited(code) => write!(f, "exit {}", code),
            ExitDisposition::Signaled(sig) => write!(f, "signal {}", sig),
            ExitDisposition::Killed => write!(f, "killed"),
            ExitDisposition::Error(reason) => write!(f, "error: {}", reason),
            ExitDisposition::Unknown => write!(f, "unknown"),
        }
    }
}

/// One scheduled execution of a job.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The defining job version; survives catalog reloads unchanged
    pub job: Arc<Job>,
    /// Monotonically increasing within the job, persistent across restarts
    pub seq: u64,
    /// The minute the scheduler decided the job should fire
    pub scheduled_at: NaiveDateTime,
    /// Set when the child process is spawned
    pub started_at: Option<NaiveDateTime>,
    pub state: InstanceState,
}

impl Instance {
    pub fn new(job: Arc<Job>, seq: u64, scheduled_at: NaiveDateTime) -> Self {
        Self {
            job,
            seq,
            scheduled_at,
            started_at: None,
            state: InstanceState::Pending,
        }
    }
}
