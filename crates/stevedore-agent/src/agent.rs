//! The agent lifecycle façade.
//!
//! Wires the desired-state source, the executions store, the supervisor
//! factory, and the port allocator into a reconciler, runs it under a
//! reactor, and handles recovery on start and resource release on stop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::{AgentConfig, ConfigError};
use crate::model::{ChangeListener, DesiredStateSource};
use crate::ports::{PortAllocator, RangePortAllocator};
use crate::reactor::{Reactor, ReactorHandle, TickError};
use crate::reconcile::Reconciler;
use crate::store::{ExecutionsStore, FileExecutionsStore, StoreError};
use crate::supervisor::SupervisorFactory;

/// Errors starting or stopping the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The committed executions could not be loaded on startup.
    #[error("failed to load committed executions: {0}")]
    Recovery(#[from] StoreError),

    /// Reconciliation failed fatally while the agent was running.
    #[error("agent terminated by fatal reconciliation failure: {0}")]
    Fatal(#[source] TickError),
}

/// Listener that forwards desired-state change notifications to the
/// reactor. Its only effect is `update()`.
struct ReactorNotifier {
    handle: ReactorHandle,
}

impl ChangeListener for ReactorNotifier {
    fn on_change(&self) {
        self.handle.update();
    }
}

/// One node's reconciliation engine.
///
/// On start the agent recovers supervisors for every persisted execution
/// (with their persisted ports), subscribes to the desired-state source,
/// and triggers an initial reconciliation. On stop it quiesces the
/// reactor and closes every supervisor; containers keep running so an
/// agent restart never kills user workloads.
pub struct Agent {
    reactor: Reactor<Reconciler>,
}

impl Agent {
    /// Start the agent from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted executions cannot be loaded.
    pub fn start(
        model: Arc<dyn DesiredStateSource>,
        store: Box<dyn ExecutionsStore>,
        factory: Box<dyn SupervisorFactory>,
        allocator: Box<dyn PortAllocator>,
        tick_interval: Duration,
    ) -> Result<Self, AgentError> {
        let mut reconciler = Reconciler::new(Arc::clone(&model), store, allocator, factory)?;
        reconciler.recover();

        let reactor = Reactor::spawn("agent", reconciler, tick_interval);
        model.add_listener(Arc::new(ReactorNotifier {
            handle: reactor.handle(),
        }));
        reactor.update();
        info!("agent started");
        Ok(Self { reactor })
    }

    /// Start the agent with a file-backed store and range allocator built
    /// from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the persisted
    /// executions cannot be loaded.
    pub fn start_with_config(
        config: &AgentConfig,
        model: Arc<dyn DesiredStateSource>,
        factory: Box<dyn SupervisorFactory>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Self::start(
            model,
            Box::new(FileExecutionsStore::new(&config.executions_file)),
            factory,
            Box::new(RangePortAllocator::new(config.ports.start, config.ports.end)),
            config.tick_interval,
        )
    }

    /// Request a reconciliation pass.
    pub fn update(&self) {
        self.reactor.update();
    }

    /// Whether reconciliation has failed fatally. A failed agent should
    /// be stopped and restarted by its process supervisor; recovery then
    /// proceeds from the last durable executions map.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.reactor.has_failed()
    }

    /// Stop the agent: quiesce the reactor, then close every supervisor.
    ///
    /// Containers are deliberately not stopped.
    ///
    /// # Errors
    ///
    /// Returns the fatal reconciliation error if one terminated the
    /// reactor while the agent was running.
    pub fn stop(self) -> Result<(), AgentError> {
        let (mut reconciler, fatal) = self.reactor.stop();
        reconciler.close_all();
        info!("agent stopped");
        match fatal {
            None => Ok(()),
            Some(err) => Err(AgentError::Fatal(err)),
        }
    }
}
