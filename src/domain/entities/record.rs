//! Persistent scheduler state
//!
//! One small record per job, durable across engine restarts: enough to
//! avoid double-firing a minute, to advance intervals without backfilling,
//! and to keep follow-up chains honest after a crash. Records for jobs that
//! left the catalog are retained so a reappearing job keeps its history.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::instance::ExitDisposition;

/// Marker for an instance that was running when the state was last written.
/// Used at load time to detect work lost to a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningMarker {
    pub pid: Option<u32>,
    pub seq: u64,
    pub started_at: NaiveDateTime,
}

/// Durable per-job scheduling state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Last minute the job was evaluated as due, whether or not the conflict
    /// policy let the instance in; guards calendar firing against repeats.
    pub last_considered: Option<NaiveDateTime>,
    /// Base instant for the interval evaluator.
    pub last_scheduled: Option<NaiveDateTime>,
    /// Next instance sequence number.
    pub next_seq: u64,
    pub last_exit: Option<ExitDisposition>,
    pub last_end: Option<NaiveDateTime>,
    /// Post targets that have not ended since the job's own last fire.
    pub post_pending: BTreeSet<String>,
    /// Set when `post_pending` drains; consumed by the next due decision.
    pub post_ready: bool,
    pub running: Option<RunningMarker>,
}

impl JobRecord {
    /// Allocates the next instance sequence number.
    pub fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// The whole persistent store: every job record plus a marker telling the
/// next start whether the previous engine exited in an orderly fashion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub jobs: BTreeMap<String, JobRecord>,
    #[serde(default)]
    pub clean_shutdown: bool,
}
