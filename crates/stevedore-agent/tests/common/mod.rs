//! Shared test doubles for the agent scenarios.

#![allow(dead_code)] // Not every binary uses every helper.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use stevedore_agent::job::{Job, JobId, PortMapping};
use stevedore_agent::model::{ChangeListener, DesiredStateSource, ModelError, TaskMap};
use stevedore_agent::ports::{PortAllocationError, PortAllocator};
use stevedore_agent::store::{
    ExecutionsMap, ExecutionsStore, MemoryExecutionsStore, StoreError,
};
use stevedore_agent::supervisor::{
    ObservedState, Supervisor, SupervisorError, SupervisorFactory, SupervisorStatus,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The `foo` job from the reference scenarios: one dynamic port, one
/// static port.
pub fn foo_job() -> Job {
    Job::builder()
        .name("foo")
        .version("17")
        .image("foo:4711")
        .command(["foo", "foo"])
        .port("p1", PortMapping::dynamic(4711))
        .port("p2", PortMapping::fixed(4712, 12345))
        .build()
}

/// The `bar` job: no ports.
pub fn bar_job() -> Job {
    Job::builder()
        .name("bar")
        .version("63")
        .image("bar:5656")
        .command(["bar", "bar"])
        .build()
}

pub fn status(
    is_starting: bool,
    is_stopping: bool,
    is_done: bool,
    state: ObservedState,
) -> SupervisorStatus {
    SupervisorStatus {
        is_starting,
        is_stopping,
        is_done,
        state,
    }
}

#[derive(Default)]
struct MockSupervisorState {
    start_calls: usize,
    stop_calls: usize,
    close_calls: usize,
    status: SupervisorStatus,
}

/// Observer side of a [`MockSupervisor`]: tests keep the handle while the
/// reconciler owns the supervisor.
#[derive(Clone, Default)]
pub struct MockSupervisorHandle {
    state: Arc<Mutex<MockSupervisorState>>,
}

impl MockSupervisorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().unwrap().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().unwrap().stop_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn set_status(&self, status: SupervisorStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn supervisor(&self) -> Box<dyn Supervisor> {
        Box::new(MockSupervisor {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockSupervisor {
    state: Arc<Mutex<MockSupervisorState>>,
}

impl Supervisor for MockSupervisor {
    fn start(&mut self) -> Result<(), SupervisorError> {
        self.state.lock().unwrap().start_calls += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SupervisorError> {
        self.state.lock().unwrap().stop_calls += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SupervisorError> {
        self.state.lock().unwrap().close_calls += 1;
        Ok(())
    }

    fn status(&self) -> SupervisorStatus {
        self.state.lock().unwrap().status
    }
}

#[derive(Default)]
struct MockFactoryState {
    prepared: BTreeMap<JobId, VecDeque<MockSupervisorHandle>>,
    created: Vec<(JobId, BTreeMap<String, u16>)>,
}

/// Factory returning prepared mock supervisors and recording every
/// creation with the ports it was given.
#[derive(Clone, Default)]
pub struct MockSupervisorFactory {
    state: Arc<Mutex<MockFactoryState>>,
}

impl MockSupervisorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handle; the next `create` for `id` returns its supervisor.
    pub fn prepare(&self, id: &JobId) -> MockSupervisorHandle {
        let handle = MockSupervisorHandle::new();
        self.state
            .lock()
            .unwrap()
            .prepared
            .entry(id.clone())
            .or_default()
            .push_back(handle.clone());
        handle
    }

    /// Every creation so far, in order, with the ports passed in.
    pub fn created(&self) -> Vec<(JobId, BTreeMap<String, u16>)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn create_count(&self, id: &JobId) -> usize {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(created_id, _)| created_id == id)
            .count()
    }
}

impl SupervisorFactory for MockSupervisorFactory {
    fn create(
        &self,
        id: &JobId,
        _job: &Job,
        ports: &BTreeMap<String, u16>,
    ) -> Result<Box<dyn Supervisor>, SupervisorError> {
        let mut state = self.state.lock().unwrap();
        state.created.push((id.clone(), ports.clone()));
        let handle = state
            .prepared
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(handle.supervisor())
    }
}

#[derive(Default)]
struct AllocatorState {
    calls: Vec<(BTreeMap<String, PortMapping>, BTreeSet<u16>)>,
}

/// Deterministic allocator mirroring the reference scenarios: static
/// ports verbatim, dynamic ports sequential from 30000. Records every
/// call.
#[derive(Clone, Default)]
pub struct RecordingAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

impl RecordingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls(&self) -> Vec<(BTreeMap<String, PortMapping>, BTreeSet<u16>)> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl PortAllocator for RecordingAllocator {
    fn allocate(
        &self,
        requested: &BTreeMap<String, PortMapping>,
        in_use: &BTreeSet<u16>,
    ) -> Result<BTreeMap<String, u16>, PortAllocationError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push((requested.clone(), in_use.clone()));

        let mut taken = in_use.clone();
        let mut allocation = BTreeMap::new();
        for (name, mapping) in requested {
            let port = match mapping.external_port {
                Some(port) => {
                    if taken.contains(&port) {
                        return Err(PortAllocationError::Conflict {
                            name: name.clone(),
                            port,
                        });
                    }
                    port
                },
                None => {
                    let mut candidate = 30000;
                    while taken.contains(&candidate) {
                        candidate += 1;
                    }
                    candidate
                },
            };
            taken.insert(port);
            allocation.insert(name.clone(), port);
        }
        Ok(allocation)
    }
}

/// Cloneable in-memory store so tests can observe writes made by a
/// reconciler that owns the other clone.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MemoryExecutionsStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored map without counting a write, as if a previous
    /// agent had persisted it.
    pub fn seed(&self, map: ExecutionsMap) {
        *self.inner.lock().unwrap() = MemoryExecutionsStore::with_map(map);
    }

    pub fn map(&self) -> ExecutionsMap {
        self.inner.lock().unwrap().map().clone()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes()
    }

    pub fn boxed(&self) -> Box<dyn ExecutionsStore> {
        Box::new(self.clone())
    }
}

impl ExecutionsStore for SharedStore {
    fn load(&mut self) -> Result<ExecutionsMap, StoreError> {
        self.inner.lock().unwrap().load()
    }

    fn set(&mut self, map: &ExecutionsMap) -> Result<(), StoreError> {
        self.inner.lock().unwrap().set(map)
    }
}

/// Store whose writes always fail, for exercising the fatal path.
pub struct BrokenStore;

impl ExecutionsStore for BrokenStore {
    fn load(&mut self) -> Result<ExecutionsMap, StoreError> {
        Ok(ExecutionsMap::new())
    }

    fn set(&mut self, _map: &ExecutionsMap) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
}

/// Desired-state source that fails its first read, then delegates.
pub struct FlakyModel {
    inner: Arc<dyn DesiredStateSource>,
    failed_once: AtomicBool,
}

impl FlakyModel {
    pub fn new(inner: Arc<dyn DesiredStateSource>) -> Self {
        Self {
            inner,
            failed_once: AtomicBool::new(false),
        }
    }
}

impl DesiredStateSource for FlakyModel {
    fn tasks(&self) -> Result<TaskMap, ModelError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(ModelError::Unavailable("coordination service timeout".to_string()));
        }
        self.inner.tasks()
    }

    fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.inner.add_listener(listener);
    }
}
