//! # stevedore-agent
//!
//! Agent-side reconciliation engine for the stevedore container
//! orchestrator. One instance runs per worker node and continuously
//! drives the locally executing container supervisors toward the desired
//! state published by the master, reconciling against a durable record of
//! committed executions.
//!
//! ## Features
//!
//! - **Committed executions**: a persisted, atomically replaced ledger of
//!   what the agent has agreed to run, including port allocations, so
//!   restarts never lose placement decisions
//! - **Reconciliation**: a single-threaded pass computing the delta
//!   between desired tasks, committed executions, and live supervisors
//! - **Reactor**: a coalescing, edge-triggered work driver with a
//!   periodic fallback tick
//! - **Port allocation**: static mappings honored verbatim, dynamic ones
//!   drawn from a configurable range, disjoint across executions
//!
//! The container runtime itself lives behind the [`supervisor::Supervisor`]
//! trait; the master-published deployment table behind
//! [`model::DesiredStateSource`]. This crate carries no CLI and no wire
//! protocol.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use stevedore_agent::agent::Agent;
//! use stevedore_agent::config::AgentConfig;
//! use stevedore_agent::job::{Job, JobId};
//! use stevedore_agent::model::InMemoryModel;
//! use stevedore_agent::supervisor::{
//!     Supervisor, SupervisorError, SupervisorFactory,
//! };
//!
//! struct RuntimeFactory;
//!
//! impl SupervisorFactory for RuntimeFactory {
//!     fn create(
//!         &self,
//!         _id: &JobId,
//!         _job: &Job,
//!         _ports: &BTreeMap<String, u16>,
//!     ) -> Result<Box<dyn Supervisor>, SupervisorError> {
//!         unimplemented!("wrap the container runtime here")
//!     }
//! }
//!
//! let model = Arc::new(InMemoryModel::new());
//! let agent = Agent::start_with_config(
//!     &AgentConfig::default(),
//!     model,
//!     Box::new(RuntimeFactory),
//! )
//! .unwrap();
//! agent.stop().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod config;
pub mod job;
pub mod model;
pub mod ports;
pub mod reactor;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod supervisor;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::agent::Agent;
    pub use crate::config::AgentConfig;
    pub use crate::job::{Execution, Goal, Job, JobId, PortMapping, Task};
    pub use crate::model::{DesiredStateSource, InMemoryModel};
    pub use crate::ports::{PortAllocator, RangePortAllocator};
    pub use crate::store::{ExecutionsStore, FileExecutionsStore};
    pub use crate::supervisor::{Supervisor, SupervisorFactory, SupervisorStatus};
}

/// Re-export commonly used types at the crate root.
pub use agent::Agent;
pub use config::AgentConfig;
pub use job::{Execution, Goal, Job, JobId, Task};
pub use reconcile::Reconciler;
pub use store::{ExecutionsMap, ExecutionsStore};
pub use supervisor::{Supervisor, SupervisorFactory};
