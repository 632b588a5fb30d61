//! Job entity module
//!
//! This module defines the core Job entity: one catalog section with
//! inheritance resolved, immutable once the catalog is installed. Running
//! instances hold their defining `Arc<Job>` so a catalog reload never
//! changes a job mid-flight.

use std::str::FromStr;

use crate::domain::value_objects::{Interval, TimeSpec};

/// What to do when a new instance of a job is about to be enqueued while
/// another instance of the same job already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Always append a new instance; the conflict is only logged.
    Ignore,
    /// Append only if no instance of the job is already waiting. A running
    /// instance alone still allows one waiter.
    Skip,
    /// Terminate the running instance, drop any waiters, and append a single
    /// fresh instance at the tail.
    Kill,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::Ignore => "ignore",
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Kill => "kill",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ignore" => Ok(ConflictPolicy::Ignore),
            "skip" => Ok(ConflictPolicy::Skip),
            "kill" => Ok(ConflictPolicy::Kill),
            other => Err(format!(
                "unknown conflict policy '{}' (expected ignore, skip or kill)",
                other
            )),
        }
    }
}

/// When to send the outcome mail for an ended instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailPolicy {
    /// Never mail.
    Never,
    /// Mail on non-zero exit, signal death, kill preemption or setup failure.
    Error,
    /// Mail on error, or whenever the instance produced output.
    Output,
    /// Mail every ended instance.
    Always,
}

impl MailPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            MailPolicy::Never => "never",
            MailPolicy::Error => "error",
            MailPolicy::Output => "output",
            MailPolicy::Always => "always",
        }
    }

    /// Whether an ended instance with the given outcome deserves mail.
    pub fn wants_mail(self, success: bool, has_output: bool) -> bool {
        match self {
            MailPolicy::Never => false,
            MailPolicy::Error => !success,
            MailPolicy::Output => !success || has_output,
            MailPolicy::Always => true,
        }
    }
}

impl FromStr for MailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "never" => Ok(MailPolicy::Never),
            "error" => Ok(MailPolicy::Error),
            "output" => Ok(MailPolicy::Output),
            "always" => Ok(MailPolicy::Always),
            other => Err(format!(
                "unknown mail policy '{}' (expected never, error, output or always)",
                other
            )),
        }
    }
}

/// One fully-resolved job definition.
///
/// A job is scheduled when it is active and carries at least one of the three
/// schedule sources (`time`, `interval`, `post`); with none of them it is a
/// startup job, runnable only through the run-one-job-now entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Dotted catalog section name, unique within the catalog
    pub id: String,
    /// Shell source executed under the account's login shell
    pub command: String,
    /// Inactive jobs stay in the catalog but never fire
    pub active: bool,
    /// Calendar expression schedule source
    pub time: Option<TimeSpec>,
    /// Relative interval schedule source
    pub interval: Option<Interval>,
    /// Follow-up chain: ids of jobs this one fires after
    pub post: Vec<String>,
    /// Shell source evaluated synchronously before each start; non-zero
    /// exit drops the instance without running the command
    pub condition: Option<String>,
    /// Queue name; each queue runs at most one instance at a time
    pub queue: String,
    pub conflict: ConflictPolicy,
    /// Also mail a summary whenever a conflict is resolved for this job
    pub warn: bool,
    pub mail: MailPolicy,
    /// Mail recipient; defaults to the account name
    pub mailto: Option<String>,
    /// Username shown in mail subjects; defaults to the account name
    pub username: Option<String>,
    /// Hostname shown in mail subjects; defaults to the local hostname
    pub hostname: Option<String>,
    /// Path to the sendmail-compatible binary
    pub sendmail: Option<String>,
}

impl Job {
    /// Creates a job with the built-in defaults: active, own queue, conflict
    /// `ignore`, mail on `error`, no warning mail.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            queue: id.clone(),
            id,
            command: String::new(),
            active: true,
            time: None,
            interval: None,
            post: Vec::new(),
            condition: None,
            conflict: ConflictPolicy::Ignore,
            warn: false,
            mail: MailPolicy::Error,
            mailto: None,
            username: None,
            hostname: None,
            sendmail: None,
        }
    }

    /// Whether any of the three schedule sources is configured.
    pub fn is_scheduled(&self) -> bool {
        self.time.is_some() || self.interval.is_some() || !self.post.is_empty()
    }

    /// A startup job has no schedule at all.
    pub fn is_startup(&self) -> bool {
        !self.is_scheduled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let job = Job::new("backup.nightly");
        assert!(job.active);
        assert_eq!(job.queue, "backup.nightly");
        assert_eq!(job.conflict, ConflictPolicy::Ignore);
        assert_eq!(job.mail, MailPolicy::Error);
        assert!(job.is_startup());
    }

    #[test]
    fn test_scheduled_partition() {
        let mut job = Job::new("a");
        assert!(!job.is_scheduled());
        job.interval = Some("15m".parse().unwrap());
        assert!(job.is_scheduled());

        let mut chained = Job::new("b");
        chained.post = vec!["a".to_string()];
        assert!(chained.is_scheduled());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("kill".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Kill);
        assert!("ignore-all".parse::<ConflictPolicy>().is_err());
        assert_eq!("output".parse::<MailPolicy>().unwrap(), MailPolicy::Output);
        assert!("sometimes".parse::<MailPolicy>().is_err());
    }
}
