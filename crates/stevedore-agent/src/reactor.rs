//! Coalescing, edge-triggered work driver.
//!
//! The reactor runs its callback on a dedicated worker thread, at most one
//! invocation at a time. [`update`](Reactor::update) pokes are nonblocking
//! and collapse into a single pending flag while a callback is in flight,
//! and a periodic fallback runs the callback even without pokes so missed
//! notifications self-heal.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

/// Failure of one callback invocation.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// Transient failure. Logged; the reactor keeps running and the work
    /// is retried on a later tick.
    #[error("tick failed, will retry: {0}")]
    Retry(#[source] Box<dyn Error + Send + Sync>),

    /// Unrecoverable failure. The reactor stops scheduling and surfaces
    /// the error when stopped.
    #[error("fatal tick failure: {0}")]
    Fatal(#[source] Box<dyn Error + Send + Sync>),
}

impl TickError {
    /// Wrap an error as transient.
    pub fn retry(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Retry(err.into())
    }

    /// Wrap an error as fatal.
    pub fn fatal(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Fatal(err.into())
    }

    /// Whether this failure terminates the reactor.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// The unit of work a reactor drives.
pub trait ReactorCallback: Send + 'static {
    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::Retry`] for failures the next tick may
    /// resolve, [`TickError::Fatal`] to terminate the reactor.
    fn tick(&mut self) -> Result<(), TickError>;
}

struct ReactorState {
    pending: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<ReactorState>,
    tick_due: Condvar,
    failed: AtomicBool,
}

impl Shared {
    fn update(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = true;
        self.tick_due.notify_one();
    }
}

/// Cloneable poke handle, safe to call from any thread.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Request a callback run. Nonblocking and idempotent: pokes issued
    /// while a run is scheduled or in flight collapse into one.
    pub fn update(&self) {
        self.shared.update();
    }
}

/// A single-threaded, coalescing work driver with a periodic fallback.
pub struct Reactor<C: ReactorCallback> {
    name: String,
    shared: Arc<Shared>,
    worker: JoinHandle<(C, Option<TickError>)>,
}

impl<C: ReactorCallback> Reactor<C> {
    /// Start a reactor driving `callback`.
    ///
    /// The callback also runs after `interval` of inactivity, so drift
    /// from missed notifications heals within one interval.
    pub fn spawn(name: impl Into<String>, callback: C, interval: Duration) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(ReactorState {
                pending: false,
                shutdown: false,
            }),
            tick_due: Condvar::new(),
            failed: AtomicBool::new(false),
        });
        let worker = {
            let name = name.clone();
            let shared = Arc::clone(&shared);
            thread::spawn(move || run(&name, &shared, callback, interval))
        };
        Self {
            name,
            shared,
            worker,
        }
    }

    /// Request a callback run. See [`ReactorHandle::update`].
    pub fn update(&self) {
        self.shared.update();
    }

    /// A cloneable handle for poking this reactor from elsewhere.
    #[must_use]
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the callback has failed fatally and the reactor stopped
    /// scheduling.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Stop scheduling, wait for any in-flight callback to finish, and
    /// return the callback along with the fatal error, if one terminated
    /// the loop. No callback begins after this returns.
    pub fn stop(self) -> (C, Option<TickError>) {
        debug!(reactor = %self.name, "stopping reactor");
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.tick_due.notify_one();
        }
        match self.worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Worker loop: wait for a poke or the periodic deadline, then run the
/// callback with the lock released.
fn run<C: ReactorCallback>(
    name: &str,
    shared: &Shared,
    mut callback: C,
    interval: Duration,
) -> (C, Option<TickError>) {
    // Lock poisoning means a panic elsewhere; unrecoverable.
    let mut guard = shared.state.lock().unwrap();
    loop {
        let deadline = Instant::now() + interval;
        while !guard.pending && !guard.shutdown {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (reacquired, _timeout) = shared
                .tick_due
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = reacquired;
        }
        if guard.shutdown {
            return (callback, None);
        }
        let poked = guard.pending;
        guard.pending = false;
        drop(guard);

        debug!(reactor = name, poked, "running callback");
        match callback.tick() {
            Ok(()) => {},
            Err(err) if !err.is_fatal() => {
                warn!(reactor = name, error = %err, "callback failed; will retry");
            },
            Err(err) => {
                shared.failed.store(true, Ordering::SeqCst);
                error!(reactor = name, error = %err, "fatal callback failure; reactor terminating");
                return (callback, Some(err));
            },
        }

        guard = shared.state.lock().unwrap();
    }
}
