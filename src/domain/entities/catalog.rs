//! Catalog entity module
//!
//! The catalog is the complete set of job definitions parsed from
//! `crontab.ini` with inheritance resolved. It is replaced atomically by a
//! reload; jobs are shared as `Arc<Job>` so instances created before a swap
//! keep their old definition until they end.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::job::Job;

/// An immutable set of resolved jobs, keyed by id.
///
/// The backing map is ordered so per-tick job iteration is a total order on
/// job ids, keeping scheduling decisions reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    jobs: BTreeMap<String, Arc<Job>>,
}

impl Catalog {
    pub fn new(jobs: BTreeMap<String, Arc<Job>>) -> Self {
        Self { jobs }
    }

    /// A catalog with no jobs, used when `crontab.ini` is empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Job>> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// All jobs in id order.
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.values()
    }

    /// Active jobs with at least one schedule source, in id order.
    pub fn scheduled(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.values().filter(|j| j.active && j.is_scheduled())
    }

    /// Active jobs whose `post` set names the given job.
    pub fn dependents_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Arc<Job>> {
        self.jobs
            .values()
            .filter(move |j| j.active && j.post.iter().any(|t| t == id))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
