//! The desired-state source the agent reconciles against.
//!
//! The master publishes a deployment table of tasks per node; the agent
//! only ever takes cheap, stable snapshots of it. Change notifications are
//! delivered on arbitrary threads and must do nothing beyond poking the
//! reactor, which keeps the observer cycle one-way: the source knows
//! nothing about the reconciler.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::job::{Goal, Job, JobId, Task};

/// The desired tasks for this node, keyed by job id.
pub type TaskMap = BTreeMap<JobId, Task>;

/// Errors reading the desired state.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The source could not be read; transient, the next tick retries.
    #[error("desired state unavailable: {0}")]
    Unavailable(String),
}

/// Receives change notifications from a [`DesiredStateSource`].
///
/// Invoked on an arbitrary thread; implementations must only forward to
/// `Reactor::update`.
pub trait ChangeListener: Send + Sync {
    /// The desired state may have changed.
    fn on_change(&self);
}

/// Inbound interface to the master-published deployment table.
pub trait DesiredStateSource: Send + Sync {
    /// A stable snapshot of the desired tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Unavailable`] on transient read failure.
    fn tasks(&self) -> Result<TaskMap, ModelError>;

    /// Register a listener whose `on_change` eventually triggers a
    /// reconciliation.
    fn add_listener(&self, listener: Arc<dyn ChangeListener>);
}

/// Process-local [`DesiredStateSource`] backed by a mutable task table.
///
/// Useful in tests and in single-process deployments where the deployment
/// table is maintained in memory.
#[derive(Default)]
pub struct InMemoryModel {
    tasks: Mutex<TaskMap>,
    listeners: Mutex<Vec<Arc<dyn ChangeListener>>>,
}

impl InMemoryModel {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the task for a job and notify listeners.
    pub fn put_task(&self, job: Job, goal: Goal) {
        let id = job.id.clone();
        self.tasks.lock().unwrap().insert(id, Task::new(job, goal));
        self.notify();
    }

    /// Remove the task for a job, if present, and notify listeners.
    pub fn remove_task(&self, id: &JobId) {
        let removed = self.tasks.lock().unwrap().remove(id);
        if removed.is_some() {
            self.notify();
        }
    }

    fn notify(&self) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_change();
        }
    }
}

impl DesiredStateSource for InMemoryModel {
    fn tasks(&self) -> Result<TaskMap, ModelError> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.lock().unwrap().push(listener);
    }
}
