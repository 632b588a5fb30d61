//! Queue entity module
//!
//! A queue is a named FIFO of instances plus at most one running slot. The
//! engine guarantees that across the whole scheduler no queue ever has more
//! than one instance in the running state.

use std::collections::VecDeque;

use super::instance::{Instance, InstanceState};

/// The single running instance of a queue, with the bookkeeping needed to
/// terminate it and to attribute its end event.
#[derive(Debug)]
pub struct RunningSlot {
    pub instance: Instance,
    /// Child process id; absent for instances that never forked (test fakes)
    pub pid: Option<u32>,
    /// Set when the engine has requested termination, so a signal death is
    /// reported as `killed` rather than an external signal
    pub kill_requested: bool,
}

/// A FIFO serializer: instances start in arrival order, one at a time.
#[derive(Debug)]
pub struct RunQueue {
    name: String,
    waiting: VecDeque<Instance>,
    running: Option<RunningSlot>,
}

impl RunQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waiting: VecDeque::new(),
            running: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an instance at the tail.
    pub fn push(&mut self, instance: Instance) {
        debug_assert_eq!(instance.state, InstanceState::Pending);
        self.waiting.push_back(instance);
    }

    /// Removes and returns the head of the waiting line.
    pub fn pop_front(&mut self) -> Option<Instance> {
        self.waiting.pop_front()
    }

    /// Number of pending-or-ready instances of the given job.
    pub fn waiting_count_for(&self, job_id: &str) -> usize {
        self.waiting.iter().filter(|i| i.job.id == job_id).count()
    }

    /// Drops every waiting instance of the given job, returning how many
    /// were removed.
    pub fn remove_waiting(&mut self, job_id: &str) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|i| i.job.id != job_id);
        before - self.waiting.len()
    }

    pub fn running(&self) -> Option<&RunningSlot> {
        self.running.as_ref()
    }

    pub fn running_mut(&mut self) -> Option<&mut RunningSlot> {
        self.running.as_mut()
    }

    /// Fills the running slot.
    ///
    /// The queue invariant makes a double start a programming error, so this
    /// panics in debug builds rather than silently dropping a child.
    pub fn set_running(&mut self, slot: RunningSlot) {
        debug_assert!(self.running.is_none());
        self.running = Some(slot);
    }

    pub fn take_running(&mut self) -> Option<RunningSlot> {
        self.running.take()
    }

    /// Whether the given job currently occupies the running slot.
    pub fn running_job_is(&self, job_id: &str) -> bool {
        self.running
            .as_ref()
            .map(|slot| slot.instance.job.id == job_id)
            .unwrap_or(false)
    }

    /// Empty and idle queues are dropped by the engine.
    pub fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_none()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn waiting(&self) -> impl Iterator<Item = &Instance> {
        self.waiting.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Job;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn minute(m: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, m, 0)
            .unwrap()
    }

    fn instance(job_id: &str, seq: u64) -> Instance {
        Instance::new(Arc::new(Job::new(job_id)), seq, minute(0))
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = RunQueue::new("blk");
        queue.push(instance("a", 1));
        queue.push(instance("b", 1));
        queue.push(instance("a", 2));

        assert_eq!(queue.pop_front().unwrap().job.id, "a");
        assert_eq!(queue.pop_front().unwrap().job.id, "b");
        assert_eq!(queue.pop_front().unwrap().job.id, "a");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_waiting_count_and_removal() {
        let mut queue = RunQueue::new("blk");
        queue.push(instance("a", 1));
        queue.push(instance("b", 1));
        queue.push(instance("a", 2));

        assert_eq!(queue.waiting_count_for("a"), 2);
        assert_eq!(queue.remove_waiting("a"), 2);
        assert_eq!(queue.waiting_count_for("a"), 0);
        assert_eq!(queue.waiting_len(), 1);
    }

    #[test]
    fn test_idle_tracking() {
        let mut queue = RunQueue::new("blk");
        assert!(queue.is_idle());

        queue.push(instance("a", 1));
        assert!(!queue.is_idle());

        let mut inst = queue.pop_front().unwrap();
        inst.state = InstanceState::Running;
        queue.set_running(RunningSlot {
            instance: inst,
            pid: Some(42),
            kill_requested: false,
        });
        assert!(!queue.is_idle());
        assert!(queue.running_job_is("a"));

        queue.take_running();
        assert!(queue.is_idle());
    }
}
