//! Test doubles and a virtual-time harness for engine tests.
//!
//! The fake launcher never forks: a "child" is a record with a virtual end
//! time taken from a per-job duration table. The harness advances the clock
//! one minute at a time, delivering the tick first and then any child ends
//! due within that minute, so scheduling traces are fully deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::domain::entities::{Catalog, EngineState, ExitDisposition, Job};
use crate::domain::repositories::StateRepository;
use crate::application::engine::ports::TimeSource;
use crate::infrastructure::time::VirtualTimeSource;

use super::events::JobEnded;
use super::ports::{LaunchHandle, LaunchRequest, Launcher, MailIdentity, MailMessage, MailTransport};
use super::Engine;

/// A simulated child process.
#[derive(Debug, Clone)]
struct FakeChild {
    job_id: String,
    seq: u64,
    queue: String,
    ends_at: NaiveDateTime,
    killed: bool,
}

/// Shared world state the fakes and the test observe.
#[derive(Debug, Default)]
pub struct FakeWorld {
    /// How long each job's command "runs", in minutes (default 0).
    pub durations: HashMap<String, i64>,
    /// Condition results per job (default: condition passes).
    pub conditions: HashMap<String, bool>,
    /// Output each job's command "produces" (default empty).
    pub outputs: HashMap<String, String>,
    /// Jobs whose spawn should fail outright.
    pub fail_spawn: HashSet<String>,
    /// Every start, in order: job id and start minute.
    pub starts: Vec<(String, NaiveDateTime)>,
    /// Every end, in order: job id, seq, and whether it was killed.
    pub ended: Vec<(String, u64, bool)>,
    running: Vec<FakeChild>,
}

impl FakeWorld {
    /// Removes and returns end events for children due at or before `now`.
    fn take_due(&mut self, now: NaiveDateTime) -> Vec<JobEnded> {
        let mut due = Vec::new();
        let mut keep = Vec::new();
        for child in self.running.drain(..) {
            if child.ends_at <= now {
                due.push(child);
            } else {
                keep.push(child);
            }
        }
        self.running = keep;

        due.into_iter()
            .map(|child| {
                self.ended
                    .push((child.job_id.clone(), child.seq, child.killed));
                let disposition = if child.killed {
                    ExitDisposition::Signaled(15)
                } else {
                    ExitDisposition::Exited(0)
                };
                let output = self
                    .outputs
                    .get(&child.job_id)
                    .cloned()
                    .unwrap_or_default();
                JobEnded {
                    job_id: child.job_id,
                    seq: child.seq,
                    queue: child.queue,
                    disposition,
                    output,
                }
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

/// Launcher that runs jobs as virtual children in the `FakeWorld`.
pub struct FakeLauncher {
    world: Arc<Mutex<FakeWorld>>,
    clock: Arc<VirtualTimeSource>,
}

impl Launcher for FakeLauncher {
    fn spawn(&mut self, request: &LaunchRequest) -> Result<LaunchHandle> {
        let now = self.clock.now();
        let mut world = self.world.lock().unwrap();
        if world.fail_spawn.contains(&request.job.id) {
            return Err(anyhow!("spawn refused by test"));
        }
        let minutes = *world.durations.get(&request.job.id).unwrap_or(&0);
        world.starts.push((request.job.id.clone(), now));
        world.running.push(FakeChild {
            job_id: request.job.id.clone(),
            seq: request.seq,
            queue: request.queue.clone(),
            ends_at: now + Duration::minutes(minutes),
            killed: false,
        });
        Ok(LaunchHandle { pid: None })
    }

    fn kill(&mut self, job_id: &str, seq: u64, _pid: Option<u32>) -> Result<()> {
        let now = self.clock.now();
        let mut world = self.world.lock().unwrap();
        for child in world
            .running
            .iter_mut()
            .filter(|c| c.job_id == job_id && c.seq == seq)
        {
            child.killed = true;
            child.ends_at = now;
        }
        Ok(())
    }

    fn run_condition(&mut self, job: &Job) -> Result<bool> {
        let world = self.world.lock().unwrap();
        Ok(*world.conditions.get(&job.id).unwrap_or(&true))
    }
}

/// Mail transport that just records what it was handed.
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
}

impl MailTransport for RecordingMailer {
    fn deliver(&self, message: &MailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// In-memory state store shared across engine restarts within a test.
pub struct MemoryStateRepository {
    state: Arc<Mutex<EngineState>>,
}

impl StateRepository for MemoryStateRepository {
    fn load(&self) -> Result<EngineState> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &EngineState) -> Result<()> {
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

/// Default simulation epoch: an arbitrary midnight.
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn catalog_of(jobs: Vec<Job>) -> Catalog {
    Catalog::new(
        jobs.into_iter()
            .map(|job| (job.id.clone(), Arc::new(job)))
            .collect(),
    )
}

/// Virtual-time test harness around a fully wired engine.
pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<VirtualTimeSource>,
    pub world: Arc<Mutex<FakeWorld>>,
    pub mails: Arc<Mutex<Vec<MailMessage>>>,
    store: Arc<Mutex<EngineState>>,
    catalog: Catalog,
    start: NaiveDateTime,
}

impl Harness {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_start(catalog, epoch())
    }

    pub fn with_start(catalog: Catalog, start: NaiveDateTime) -> Self {
        let clock = Arc::new(VirtualTimeSource::new(start));
        let world = Arc::new(Mutex::new(FakeWorld::default()));
        let mails = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(Mutex::new(EngineState::default()));
        let engine = Self::build_engine(&catalog, &clock, &world, &mails, &store);
        Self {
            engine,
            clock,
            world,
            mails,
            store,
            catalog,
            start,
        }
    }

    fn build_engine(
        catalog: &Catalog,
        clock: &Arc<VirtualTimeSource>,
        world: &Arc<Mutex<FakeWorld>>,
        mails: &Arc<Mutex<Vec<MailMessage>>>,
        store: &Arc<Mutex<EngineState>>,
    ) -> Engine {
        let repository = MemoryStateRepository {
            state: store.clone(),
        };
        let state = repository.load().unwrap();
        Engine::new(
            catalog.clone(),
            state,
            Box::new(repository),
            Box::new(FakeLauncher {
                world: world.clone(),
                clock: clock.clone(),
            }),
            Box::new(RecordingMailer {
                sent: mails.clone(),
            }),
            clock.clone(),
            MailIdentity {
                username: "tester".to_string(),
                hostname: "localhost".to_string(),
            },
        )
    }

    /// Tears the engine down (without clean shutdown) and builds a fresh one
    /// from whatever the store last saw, as a daemon restart would.
    pub fn restart(&mut self) {
        self.engine = Self::build_engine(
            &self.catalog,
            &self.clock,
            &self.world,
            &self.mails,
            &self.store,
        );
        self.engine.startup();
    }

    pub fn start(&mut self) {
        self.engine.startup();
    }

    pub fn swap(&mut self, catalog: Catalog) {
        self.catalog = catalog.clone();
        self.engine.swap_catalog(catalog);
    }

    /// Simulates one minute: move the clock, tick, then deliver every child
    /// end due within the minute (repeating, since an end may start a
    /// zero-length successor that also ends now).
    pub fn run_minute(&mut self, minute: i64) {
        self.clock.set(self.start + Duration::minutes(minute));
        self.engine.tick();
        self.drain();
    }

    /// Runs the inclusive minute range.
    pub fn run_minutes(&mut self, from: i64, to: i64) {
        for minute in from..=to {
            self.run_minute(minute);
        }
    }

    /// Delivers due end events until the world settles.
    pub fn drain(&mut self) {
        loop {
            let due = {
                let mut world = self.world.lock().unwrap();
                world.take_due(self.clock.now())
            };
            if due.is_empty() {
                return;
            }
            for ended in due {
                self.engine.handle_job_ended(ended);
            }
        }
    }

    /// Start minutes (relative to the harness epoch) of the given job.
    pub fn starts_of(&self, job_id: &str) -> Vec<i64> {
        self.world
            .lock()
            .unwrap()
            .starts
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, t)| (*t - self.start).num_minutes())
            .collect()
    }
}
