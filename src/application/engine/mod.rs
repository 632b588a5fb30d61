//! The scheduling engine
//!
//! Single-threaded cooperative core of the daemon. The engine is the sole
//! mutator of the catalog pointer, the queues, and the persistent state
//! buffer; child processes are the only true parallelism, and everything
//! they or the signal handlers have to say arrives through one event queue.
//!
//! The run loop around the engine lives with the CLI; tests drive `tick`
//! and `handle_job_ended` directly under virtual time.

pub mod events;
pub mod ports;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub mod testing;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn, Level};

use crate::application::services::conflict::{self, ConflictAction};
use crate::application::services::schedule;
use crate::domain::entities::{
    Catalog, EngineState, ExitDisposition, Instance, InstanceState, Job, JobRecord, RunQueue,
    RunningMarker, RunningSlot,
};
use crate::domain::repositories::StateRepository;

use events::JobEnded;
use ports::{LaunchRequest, Launcher, MailIdentity, MailMessage, MailTransport, TimeSource};

/// Fallback mail binary when neither the job nor its ancestors set one.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// The per-user scheduling engine.
///
/// Owns the catalog, the queues, the persistent records, and the ports to
/// the outside world. All methods run on the main loop; none of them block
/// on children.
pub struct Engine {
    catalog: Catalog,
    records: BTreeMap<String, JobRecord>,
    queues: BTreeMap<String, RunQueue>,
    store: Box<dyn StateRepository>,
    launcher: Box<dyn Launcher>,
    mailer: Box<dyn MailTransport>,
    time: Arc<dyn TimeSource>,
    identity: MailIdentity,
    was_clean_shutdown: bool,
    dirty: bool,
    shutting_down: bool,
}

impl Engine {
    pub fn new(
        catalog: Catalog,
        state: EngineState,
        store: Box<dyn StateRepository>,
        launcher: Box<dyn Launcher>,
        mailer: Box<dyn MailTransport>,
        time: Arc<dyn TimeSource>,
        identity: MailIdentity,
    ) -> Self {
        Self {
            catalog,
            records: state.jobs,
            queues: BTreeMap::new(),
            store,
            launcher,
            mailer,
            time,
            identity,
            was_clean_shutdown: state.clean_shutdown,
            dirty: false,
            shutting_down: false,
        }
    }

    /// Reconciles the loaded state with reality before the first tick.
    ///
    /// Any record still claiming a running instance belongs to an engine
    /// that is gone (a live one would have refused us the pid file), so the
    /// instance is closed with unknown status. Follow-up bookkeeping is
    /// seeded for every post-bearing job in the catalog.
    pub fn startup(&mut self) {
        let now = schedule::truncate_minute(self.time.now());
        if !self.was_clean_shutdown && !self.records.is_empty() {
            info!("previous engine did not shut down cleanly");
        }
        for (id, record) in self.records.iter_mut() {
            if let Some(marker) = record.running.take() {
                warn!(
                    job = %id,
                    seq = marker.seq,
                    pid = ?marker.pid,
                    "instance was running at last shutdown; outcome unknown"
                );
                record.last_exit = Some(ExitDisposition::Unknown);
                record.last_end = Some(now);
                self.dirty = true;
            }
        }
        self.reconcile_post_jobs(now);
        self.flush_if_dirty();
    }

    /// The minute boundary the run loop should sleep until.
    pub fn next_minute(&self) -> NaiveDateTime {
        schedule::truncate_minute(self.time.now()) + chrono::Duration::minutes(1)
    }

    /// Minute boundary: evaluate every scheduled job in id order, then start
    /// whatever the queues allow.
    pub fn tick(&mut self) {
        let now = schedule::truncate_minute(self.time.now());
        let jobs: Vec<Arc<Job>> = self.catalog.scheduled().cloned().collect();
        for job in jobs {
            self.consider_job(&job, now);
        }
        self.advance_queues(now);
        self.prune_queues();
        self.flush_if_dirty();
    }

    /// A child finished: settle the instance, mail, feed follow-up chains,
    /// and promote queues.
    pub fn handle_job_ended(&mut self, ended: JobEnded) {
        let now = schedule::truncate_minute(self.time.now());

        let mut slot = {
            let Some(queue) = self.queues.get_mut(&ended.queue) else {
                warn!(job = %ended.job_id, queue = %ended.queue, "end event for unknown queue");
                return;
            };
            match queue.take_running() {
                Some(slot)
                    if slot.instance.job.id == ended.job_id && slot.instance.seq == ended.seq =>
                {
                    slot
                }
                other => {
                    if let Some(slot) = other {
                        queue.set_running(slot);
                    }
                    warn!(job = %ended.job_id, seq = ended.seq, "stray end event ignored");
                    return;
                }
            }
        };

        slot.instance.state = InstanceState::Ended;
        // A signal death we asked for is a kill, not an external signal.
        let disposition = match (&ended.disposition, slot.kill_requested) {
            (ExitDisposition::Signaled(_), true) => ExitDisposition::Killed,
            (other, _) => other.clone(),
        };
        if disposition.is_success() {
            info!(job = %ended.job_id, seq = ended.seq, queue = %ended.queue, "instance ended");
        } else {
            warn!(
                job = %ended.job_id,
                seq = ended.seq,
                queue = %ended.queue,
                outcome = %disposition,
                "instance ended"
            );
        }

        self.record_end(&ended.job_id, &disposition, now);
        self.send_outcome_mail(slot.instance.job.as_ref(), &disposition, &ended.output);
        self.notify_post_dependents(&ended.job_id, now);
        self.advance_queues(now);
        self.prune_queues();
        self.flush_if_dirty();
    }

    /// Installs a new catalog. Running instances keep their old definitions;
    /// jobs new to the catalog are scheduled from this instant.
    pub fn swap_catalog(&mut self, catalog: Catalog) {
        let now = schedule::truncate_minute(self.time.now());
        info!(jobs = catalog.len(), "catalog installed");
        self.catalog = catalog;
        self.reconcile_post_jobs(now);
        self.flush_if_dirty();
    }

    /// Writes the full scheduler picture to the log (`SIGUSR1`).
    pub fn dump_state(&self) {
        if !tracing::enabled!(Level::INFO) {
            return;
        }
        let now = schedule::truncate_minute(self.time.now());
        let fallback = JobRecord::default();
        info!(jobs = self.catalog.len(), queues = self.queues.len(), "scheduler state dump");
        for job in self.catalog.jobs() {
            let record = self.records.get(&job.id).unwrap_or(&fallback);
            info!(
                job = %job.id,
                active = job.active,
                queue = %job.queue,
                next_fire = ?schedule::next_fire(job.as_ref(), record, now),
                last_end = ?record.last_end,
                last_exit = ?record.last_exit,
                post_pending = ?record.post_pending,
                "job"
            );
        }
        for (name, queue) in &self.queues {
            info!(
                queue = %name,
                waiting = queue.waiting_len(),
                running = ?queue.running().map(|s| (s.instance.job.id.clone(), s.instance.seq)),
                "queue"
            );
        }
    }

    /// Signals every running instance and stops starting new ones. Returns
    /// how many instances are still out there; their end events settle
    /// through `handle_job_ended` as usual.
    pub fn begin_shutdown(&mut self) -> usize {
        self.shutting_down = true;
        let mut remaining = 0;
        for (name, queue) in self.queues.iter_mut() {
            if let Some(slot) = queue.running_mut() {
                remaining += 1;
                if !slot.kill_requested {
                    slot.kill_requested = true;
                    if let Err(error) =
                        self.launcher
                            .kill(&slot.instance.job.id, slot.instance.seq, slot.pid)
                    {
                        warn!(queue = %name, %error, "failed to signal instance during shutdown");
                    }
                }
            }
        }
        remaining
    }

    pub fn running_count(&self) -> usize {
        self.queues.values().filter(|q| q.running().is_some()).count()
    }

    /// Final state write with the clean-shutdown marker set.
    pub fn finalize_shutdown(&mut self) {
        self.flush(true);
    }

    pub fn flush_if_dirty(&mut self) {
        if self.dirty {
            self.flush(false);
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn record(&self, job_id: &str) -> Option<&JobRecord> {
        self.records.get(job_id)
    }

    pub fn queue(&self, name: &str) -> Option<&RunQueue> {
        self.queues.get(name)
    }

    /// Evaluates one job at the given minute and, if due, runs it through
    /// the conflict policy and into its queue. Every due decision advances
    /// the consideration marks and consumes follow-up readiness, whether or
    /// not an instance is admitted.
    fn consider_job(&mut self, job: &Arc<Job>, now: NaiveDateTime) {
        let record = self.records.entry(job.id.clone()).or_default();
        if !schedule::is_due(job.as_ref(), record, now) {
            return;
        }
        record.last_considered = Some(now);
        record.last_scheduled = Some(now);
        if !job.post.is_empty() {
            record.post_ready = false;
            record.post_pending = job.post.iter().cloned().collect();
        }
        let seq = record.take_seq();
        self.dirty = true;
        debug!(job = %job.id, seq, minute = %now, "job due");

        let mut conflict_note: Option<String> = None;
        {
            let queue = self
                .queues
                .entry(job.queue.clone())
                .or_insert_with(|| RunQueue::new(job.queue.clone()));
            let waiting = queue.waiting_count_for(&job.id);
            let running = queue.running_job_is(&job.id);

            match conflict::resolve(job.conflict, waiting, running) {
                ConflictAction::Append { conflicted } => {
                    if conflicted {
                        warn!(
                            job = %job.id,
                            queue = %job.queue,
                            waiting,
                            running,
                            "conflict: appending another instance"
                        );
                        conflict_note = Some(format!(
                            "a new instance was queued while {} older one(s) existed",
                            waiting + usize::from(running)
                        ));
                    }
                    queue.push(Instance::new(job.clone(), seq, now));
                }
                ConflictAction::Drop => {
                    info!(job = %job.id, queue = %job.queue, "conflict: instance skipped");
                    conflict_note =
                        Some("a firing was skipped because an instance was already waiting".into());
                }
                ConflictAction::KillAndReplace => {
                    let dropped = queue.remove_waiting(&job.id);
                    if let Some(slot) = queue.running_mut() {
                        if slot.instance.job.id == job.id && !slot.kill_requested {
                            slot.kill_requested = true;
                            let pid = slot.pid;
                            let running_seq = slot.instance.seq;
                            if let Err(error) = self.launcher.kill(&job.id, running_seq, pid) {
                                warn!(job = %job.id, %error, "failed to signal instance");
                            }
                        }
                    }
                    warn!(
                        job = %job.id,
                        queue = %job.queue,
                        dropped,
                        "conflict: replacing previous instances"
                    );
                    conflict_note = Some("the previous instance was terminated and replaced".into());
                    queue.push(Instance::new(job.clone(), seq, now));
                }
            }
        }

        if job.warn {
            if let Some(note) = conflict_note {
                self.send_conflict_mail(job.as_ref(), &note);
            }
        }
    }

    fn advance_queues(&mut self, now: NaiveDateTime) {
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.advance_queue(&name, now);
        }
    }

    /// Starts instances from the head of a queue until one sticks in the
    /// running slot or the queue drains. Condition evaluation is synchronous
    /// and suspends the whole engine; that is a documented design
    /// constraint, bounded by the launcher's condition timeout.
    fn advance_queue(&mut self, name: &str, now: NaiveDateTime) {
        loop {
            if self.shutting_down {
                return;
            }
            let mut instance = {
                let Some(queue) = self.queues.get_mut(name) else {
                    return;
                };
                if queue.running().is_some() {
                    return;
                }
                match queue.pop_front() {
                    Some(instance) => instance,
                    None => return,
                }
            };
            instance.state = InstanceState::Ready;

            if instance.job.condition.is_some() {
                match self.launcher.run_condition(instance.job.as_ref()) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(job = %instance.job.id, seq = instance.seq, "condition not met, instance skipped");
                        continue;
                    }
                    Err(error) => {
                        warn!(job = %instance.job.id, seq = instance.seq, %error, "condition failed, instance skipped");
                        continue;
                    }
                }
            }

            let request = LaunchRequest {
                job: instance.job.clone(),
                seq: instance.seq,
                queue: name.to_string(),
                scheduled_at: instance.scheduled_at,
            };
            match self.launcher.spawn(&request) {
                Ok(handle) => {
                    let started_at = self.time.now();
                    instance.state = InstanceState::Running;
                    instance.started_at = Some(started_at);
                    let record = self.records.entry(instance.job.id.clone()).or_default();
                    record.running = Some(RunningMarker {
                        pid: handle.pid,
                        seq: instance.seq,
                        started_at,
                    });
                    self.dirty = true;
                    info!(
                        job = %instance.job.id,
                        seq = instance.seq,
                        queue = %name,
                        pid = ?handle.pid,
                        "instance started"
                    );
                    let pid = handle.pid;
                    if let Some(queue) = self.queues.get_mut(name) {
                        queue.set_running(RunningSlot {
                            instance,
                            pid,
                            kill_requested: false,
                        });
                    }
                    return;
                }
                Err(error) => {
                    error!(job = %instance.job.id, seq = instance.seq, %error, "failed to start instance");
                    let disposition = ExitDisposition::Error(error.to_string());
                    self.record_end(&instance.job.id, &disposition, now);
                    self.send_outcome_mail(instance.job.as_ref(), &disposition, "");
                    continue;
                }
            }
        }
    }

    fn prune_queues(&mut self) {
        self.queues.retain(|_, queue| !queue.is_idle());
    }

    fn record_end(&mut self, job_id: &str, disposition: &ExitDisposition, now: NaiveDateTime) {
        let record = self.records.entry(job_id.to_string()).or_default();
        record.last_exit = Some(disposition.clone());
        record.last_end = Some(now);
        record.running = None;
        self.dirty = true;
    }

    /// Ticks the ended job off every dependent's pending set; dependents
    /// whose set drains fire immediately rather than waiting for the next
    /// minute boundary.
    fn notify_post_dependents(&mut self, ended_job: &str, now: NaiveDateTime) {
        let dependents: Vec<Arc<Job>> = self.catalog.dependents_of(ended_job).cloned().collect();
        for job in dependents {
            let record = self.records.entry(job.id.clone()).or_default();
            if record.post_pending.remove(ended_job) {
                self.dirty = true;
            }
            if record.post_pending.is_empty() && !record.post_ready {
                record.post_ready = true;
                self.dirty = true;
                debug!(job = %job.id, after = %ended_job, "follow-up chain satisfied");
                self.consider_job(&job, now);
            }
        }
    }

    /// Seeds follow-up bookkeeping for post-bearing jobs when they are first
    /// seen (at start or after a reload).
    ///
    /// The interval base is seeded too: for a post-bearing job the interval
    /// is a fallback and must not fire immediately. Pending sets are
    /// intersected with the current target list so removed targets cannot
    /// block a chain forever; a drained set without readiness is refilled.
    fn reconcile_post_jobs(&mut self, now: NaiveDateTime) {
        let jobs: Vec<Arc<Job>> = self
            .catalog
            .jobs()
            .filter(|j| !j.post.is_empty())
            .cloned()
            .collect();
        for job in jobs {
            let record = self.records.entry(job.id.clone()).or_default();
            if record.last_scheduled.is_none() && record.last_considered.is_none() {
                record.last_scheduled = Some(now);
                self.dirty = true;
            }
            let before = record.post_pending.len();
            record.post_pending.retain(|t| job.post.contains(t));
            if record.post_pending.len() != before {
                self.dirty = true;
            }
            if !record.post_ready && record.post_pending.is_empty() {
                record.post_pending = job.post.iter().cloned().collect();
                self.dirty = true;
            }
        }
    }

    fn send_outcome_mail(&self, job: &Job, disposition: &ExitDisposition, output: &str) {
        if !job
            .mail
            .wants_mail(disposition.is_success(), !output.is_empty())
        {
            return;
        }

        let mut body = format!(
            "job: {}\nqueue: {}\nstatus: {}\n",
            job.id, job.queue, disposition
        );
        if !output.is_empty() {
            body.push('\n');
            body.push_str(output);
        }
        let message = self.build_mail(job, &disposition.to_string(), body);
        if let Err(error) = self.mailer.deliver(&message) {
            warn!(job = %job.id, %error, "mail delivery failed");
        }
    }

    fn send_conflict_mail(&self, job: &Job, note: &str) {
        let body = format!("job: {}\nqueue: {}\n\n{}\n", job.id, job.queue, note);
        let message = self.build_mail(job, "conflict", body);
        if let Err(error) = self.mailer.deliver(&message) {
            warn!(job = %job.id, %error, "mail delivery failed");
        }
    }

    fn build_mail(&self, job: &Job, outcome: &str, body: String) -> MailMessage {
        let username = job.username.as_deref().unwrap_or(&self.identity.username);
        let hostname = job.hostname.as_deref().unwrap_or(&self.identity.hostname);
        let to = job
            .mailto
            .clone()
            .unwrap_or_else(|| self.identity.username.clone());
        MailMessage {
            to,
            subject: format!("{}@{}: {} {}", username, hostname, job.id, outcome),
            body,
            sendmail: job
                .sendmail
                .clone()
                .unwrap_or_else(|| DEFAULT_SENDMAIL.to_string()),
        }
    }

    fn flush(&mut self, clean: bool) {
        let state = EngineState {
            jobs: self.records.clone(),
            clean_shutdown: clean,
        };
        match self.store.save(&state) {
            Ok(()) => self.dirty = false,
            Err(error) => {
                // Best-effort durability: stay dirty and retry at the next
                // flush point.
                warn!(%error, "state store write failed; will retry");
            }
        }
    }
}
