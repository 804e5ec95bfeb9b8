//! Reconciliation of desired tasks, committed executions, and live
//! supervisors.
//!
//! Each tick is one bounded, synchronous pass executed under the reactor's
//! single-threaded guarantee, so neither the committed map nor the
//! registry needs locking. The pass is write-ahead: the new executions map
//! is persisted before any supervisor is created, closed, or driven.
//!
//! A job that disappears from the desired table is *not* stopped; a
//! container stops only when the table says `undeploy`. A master that
//! transiently publishes an incomplete table therefore cannot take down
//! running workloads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{Execution, Goal, JobId};
use crate::model::{DesiredStateSource, ModelError, TaskMap};
use crate::ports::PortAllocator;
use crate::reactor::{ReactorCallback, TickError};
use crate::registry::SupervisorRegistry;
use crate::store::{ExecutionsMap, ExecutionsStore, StoreError};
use crate::supervisor::{SupervisorFactory, SupervisorStatus};

/// Failure of one reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired state could not be read; retried on the next tick.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The executions map could not be persisted. Fatal: the agent cannot
    /// guarantee its invariants without durable state.
    #[error("failed to persist executions: {0}")]
    Persist(#[from] StoreError),

    /// A bookkeeping invariant was violated. Fatal programmer error.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl ReconcileError {
    /// Whether this failure must terminate the agent.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Model(_))
    }
}

/// Drives the committed executions and the supervisor registry toward the
/// desired state. Runs exclusively as the reactor's callback.
pub struct Reconciler {
    model: Arc<dyn DesiredStateSource>,
    store: Box<dyn ExecutionsStore>,
    allocator: Box<dyn PortAllocator>,
    factory: Box<dyn SupervisorFactory>,
    committed: ExecutionsMap,
    registry: SupervisorRegistry,
}

impl Reconciler {
    /// Create a reconciler, loading the committed executions from the
    /// store.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted map cannot be loaded.
    pub fn new(
        model: Arc<dyn DesiredStateSource>,
        mut store: Box<dyn ExecutionsStore>,
        allocator: Box<dyn PortAllocator>,
        factory: Box<dyn SupervisorFactory>,
    ) -> Result<Self, StoreError> {
        let committed = store.load()?;
        Ok(Self {
            model,
            store,
            allocator,
            factory,
            committed,
            registry: SupervisorRegistry::new(),
        })
    }

    /// Recreate a supervisor for every committed execution, using the
    /// persisted port allocation. Ports are never reallocated on
    /// recovery.
    ///
    /// Creation failures are logged and retried on the next tick.
    pub fn recover(&mut self) {
        for (id, execution) in &self.committed {
            if self.registry.contains(id) {
                continue;
            }
            match self.factory.create(id, &execution.job, &execution.ports) {
                Ok(supervisor) => self.registry.insert(id.clone(), supervisor),
                Err(e) => {
                    warn!(job = %id, error = %e, "failed to recreate supervisor during recovery");
                },
            }
        }
        info!(
            executions = self.committed.len(),
            supervisors = self.registry.len(),
            "recovered committed executions"
        );
    }

    /// Run one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the desired state cannot be read, and
    /// a fatal one if persistence fails or an invariant is violated.
    pub fn reconcile(&mut self) -> Result<(), ReconcileError> {
        // A supervisor without a committed execution means some path other
        // than this reconciler mutated the bookkeeping.
        for id in self.registry.job_ids() {
            if !self.committed.contains_key(&id) {
                return Err(ReconcileError::Invariant(format!(
                    "supervisor for {id} has no committed execution"
                )));
            }
        }

        let desired = self.model.tasks()?;
        let mut statuses = self.registry.statuses();
        let TickPlan { next, reaped } =
            plan(&self.committed, &desired, &statuses, self.allocator.as_ref());

        // Write-ahead: the map must be durable before supervisors change.
        if next != self.committed {
            self.store.set(&next)?;
            info!(
                executions = next.len(),
                reaped = reaped.len(),
                "committed executions updated"
            );
            self.committed = next;
        }

        // Discard supervisors of reaped executions first, so a job
        // redeployed in the same tick gets a fresh supervisor. The stale
        // status snapshot goes with them.
        for id in &reaped {
            statuses.remove(id);
            if let Some(mut supervisor) = self.registry.remove(id) {
                debug!(job = %id, "closing supervisor of reaped execution");
                if let Err(e) = supervisor.close() {
                    warn!(job = %id, error = %e, "failed to close supervisor");
                }
            }
        }

        // Create supervisors for executions that lack one.
        for (id, execution) in &self.committed {
            if self.registry.contains(id) {
                continue;
            }
            match self.factory.create(id, &execution.job, &execution.ports) {
                Ok(supervisor) => self.registry.insert(id.clone(), supervisor),
                Err(e) => {
                    warn!(job = %id, error = %e, "failed to create supervisor; will retry");
                },
            }
        }

        // Drive each supervisor toward its execution's goal.
        for (id, execution) in &self.committed {
            let Some(supervisor) = self.registry.get_mut(id) else {
                continue;
            };
            let status = statuses
                .get(id)
                .copied()
                .unwrap_or_else(|| supervisor.status());
            let result = match execution.goal {
                Goal::Start if !status.is_starting => {
                    debug!(job = %id, state = %status.state, "requesting start");
                    supervisor.start()
                },
                Goal::Stop if !status.is_stopping => {
                    debug!(job = %id, state = %status.state, "requesting stop");
                    supervisor.stop()
                },
                Goal::Undeploy if !status.is_stopping && !status.is_done => {
                    debug!(job = %id, state = %status.state, "requesting stop before undeploy");
                    supervisor.stop()
                },
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(job = %id, goal = %execution.goal, error = %e, "supervisor request failed");
            }
        }

        Ok(())
    }

    /// The committed executions map.
    #[must_use]
    pub fn committed(&self) -> &ExecutionsMap {
        &self.committed
    }

    /// The ids of jobs with a live supervisor.
    #[must_use]
    pub fn supervised_jobs(&self) -> Vec<JobId> {
        self.registry.job_ids()
    }

    /// Close every supervisor, releasing resources without stopping the
    /// containers. Used on agent shutdown.
    pub(crate) fn close_all(&mut self) {
        for (id, mut supervisor) in self.registry.drain() {
            debug!(job = %id, "closing supervisor");
            if let Err(e) = supervisor.close() {
                warn!(job = %id, error = %e, "failed to close supervisor during shutdown");
            }
        }
    }
}

impl ReactorCallback for Reconciler {
    fn tick(&mut self) -> Result<(), TickError> {
        self.reconcile().map_err(|e| {
            if e.is_fatal() {
                TickError::fatal(e)
            } else {
                TickError::retry(e)
            }
        })
    }
}

/// The map changes one tick wants to apply.
struct TickPlan {
    next: ExecutionsMap,
    reaped: BTreeSet<JobId>,
}

/// Compute the next committed map from the current one, the desired
/// tasks, and the supervisor status snapshot. Pure apart from the port
/// allocator and logging.
fn plan(
    committed: &ExecutionsMap,
    desired: &TaskMap,
    statuses: &BTreeMap<JobId, SupervisorStatus>,
    allocator: &dyn PortAllocator,
) -> TickPlan {
    let mut next = committed.clone();
    let mut reaped = BTreeSet::new();

    // Reap executions that have finished undeploying. A missing
    // supervisor counts as quiesced: there is nothing left to wait for.
    // Reaping before the add pass lets a quiesced job be redeployed in
    // the same tick, with fresh ports.
    next.retain(|id, execution| {
        if execution.goal != Goal::Undeploy {
            return true;
        }
        let done = statuses.get(id).map_or(true, |status| status.is_done);
        if done {
            debug!(job = %id, "reaping undeployed execution");
            reaped.insert(id.clone());
        }
        !done
    });

    for (id, task) in desired {
        match next.get(id) {
            Some(execution) => {
                if execution.goal == task.goal {
                    continue;
                }
                if execution.goal == Goal::Undeploy {
                    // The old execution is still winding down; the job is
                    // treated as brand-new only after it is reaped.
                    debug!(job = %id, "previous execution still undeploying; deferring");
                    continue;
                }
                // Goal changes preserve the job and its ports.
                let updated = execution.clone().with_goal(task.goal);
                next.insert(id.clone(), updated);
            },
            None => {
                if task.goal == Goal::Undeploy {
                    // Nothing committed to undeploy.
                    continue;
                }
                let in_use = ports_in_use(&next);
                match allocator.allocate(&task.job.ports, &in_use) {
                    Ok(ports) => {
                        debug!(job = %id, ?ports, goal = %task.goal, "committing new execution");
                        let execution = Execution::of(task.job.clone())
                            .with_goal(task.goal)
                            .with_ports(ports);
                        next.insert(id.clone(), execution);
                    },
                    Err(e) => {
                        warn!(job = %id, error = %e, "port allocation failed; job deferred to next tick");
                    },
                }
            },
        }
    }

    TickPlan { next, reaped }
}

/// All host ports claimed by the given executions.
fn ports_in_use(map: &ExecutionsMap) -> BTreeSet<u16> {
    map.values()
        .flat_map(|execution| execution.ports.values().copied())
        .collect()
}
