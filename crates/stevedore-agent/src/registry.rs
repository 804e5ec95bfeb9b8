//! Process-local table of live supervisors.

use std::collections::BTreeMap;
use std::fmt;

use crate::job::JobId;
use crate::supervisor::{Supervisor, SupervisorStatus};

/// The live supervisors, keyed by job id.
///
/// Only the reconciler reads or writes this table, always from within a
/// reactor tick, so the registry needs no internal synchronization. At
/// every quiescent point its key set equals the key set of the committed
/// executions map.
#[derive(Default)]
pub struct SupervisorRegistry {
    supervisors: BTreeMap<JobId, Box<dyn Supervisor>>,
}

impl SupervisorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live supervisors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    /// Whether a supervisor exists for the job.
    #[must_use]
    pub fn contains(&self, id: &JobId) -> bool {
        self.supervisors.contains_key(id)
    }

    /// The ids of all supervised jobs, in order.
    #[must_use]
    pub fn job_ids(&self) -> Vec<JobId> {
        self.supervisors.keys().cloned().collect()
    }

    /// Insert a supervisor for a job.
    pub fn insert(&mut self, id: JobId, supervisor: Box<dyn Supervisor>) {
        self.supervisors.insert(id, supervisor);
    }

    /// The supervisor for a job, if any.
    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut (dyn Supervisor + '_)> {
        match self.supervisors.get_mut(id) {
            Some(s) => Some(&mut **s),
            None => None,
        }
    }

    /// Remove and return the supervisor for a job.
    pub fn remove(&mut self, id: &JobId) -> Option<Box<dyn Supervisor>> {
        self.supervisors.remove(id)
    }

    /// Snapshot the status of every supervisor.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<JobId, SupervisorStatus> {
        self.supervisors
            .iter()
            .map(|(id, supervisor)| (id.clone(), supervisor.status()))
            .collect()
    }

    /// Remove and yield every supervisor, leaving the registry empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (JobId, Box<dyn Supervisor>)> {
        std::mem::take(&mut self.supervisors).into_iter()
    }
}

impl fmt::Debug for SupervisorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorRegistry")
            .field("jobs", &self.job_ids())
            .finish()
    }
}
