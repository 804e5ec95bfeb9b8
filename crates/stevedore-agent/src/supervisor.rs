//! The supervisor capability surface the reconciler drives.
//!
//! A supervisor owns one container instance. Concrete implementations wrap
//! a container runtime and live outside this crate; the reconciler only
//! issues idempotent `start`/`stop`/`close` requests and polls status
//! snapshots. Transitions happen asynchronously inside the supervisor, and
//! status changes should eventually reach the agent through whatever
//! mechanism pokes the reactor.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::job::{Job, JobId};

/// Coarse lifecycle state a supervisor reports for its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedState {
    /// The container is being created.
    Creating,

    /// The container is starting up.
    Starting,

    /// The container is running.
    Running,

    /// The container is being stopped.
    Stopping,

    /// The container was stopped on request.
    Stopped,

    /// The container exited on its own.
    Exited,

    /// The container failed.
    Failed,
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of a supervisor's observable status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// The supervisor is driving toward (or holding) the running state.
    pub is_starting: bool,

    /// The supervisor is driving toward (or holding) the stopped state.
    pub is_stopping: bool,

    /// The supervisor has quiesced and can safely be discarded.
    pub is_done: bool,

    /// Last observed container state.
    pub state: ObservedState,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            is_starting: false,
            is_stopping: false,
            is_done: false,
            state: ObservedState::Creating,
        }
    }
}

/// Errors surfaced by supervisor operations.
///
/// All of these are per-job and transient from the reconciler's point of
/// view: the offending job is skipped for the tick and retried later.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor could not be created.
    #[error("failed to create supervisor: {0}")]
    Create(String),

    /// The start request could not be issued.
    #[error("failed to start container: {0}")]
    Start(String),

    /// The stop request could not be issued.
    #[error("failed to stop container: {0}")]
    Stop(String),

    /// Supervisor resources could not be released.
    #[error("failed to release supervisor: {0}")]
    Close(String),
}

/// One container's controller.
pub trait Supervisor: Send {
    /// Request the running goal. Idempotent when already starting or
    /// running.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued.
    fn start(&mut self) -> Result<(), SupervisorError>;

    /// Request the stopped goal. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued.
    fn stop(&mut self) -> Result<(), SupervisorError>;

    /// Release all resources without stopping the container. Terminal:
    /// the supervisor is unusable afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if resources could not be released.
    fn close(&mut self) -> Result<(), SupervisorError>;

    /// A snapshot of the current status.
    fn status(&self) -> SupervisorStatus;
}

/// Creates supervisors for committed executions.
///
/// Called exactly once per execution lifetime: on first commit with the
/// freshly allocated ports, or during recovery with the persisted ones.
pub trait SupervisorFactory: Send {
    /// Create a supervisor for `job` bound to the given host ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor could not be created; the
    /// reconciler retries on a later tick.
    fn create(
        &self,
        id: &JobId,
        job: &Job,
        ports: &BTreeMap<String, u16>,
    ) -> Result<Box<dyn Supervisor>, SupervisorError>;
}
