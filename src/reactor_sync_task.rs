//! # ReactorSyncTask
//!
//! A one-shot bridge from an application thread to the reactor thread:
//! submit a closure, block the caller until the reactor has run it, and
//! hand back its result. Implements invariant I7 and the `kTimeout = 10 s`
//! hard abort from the design's `reactor_sync_task.h`.
//!
//! `Polling` mode (matching the original's process-wide polling-mode lock,
//! injected here through the constructor per design §9 rather than reached
//! via a singleton) runs the closure directly on the calling thread while
//! holding a shared lock, with no reactor round-trip at all — used when the
//! caller already knows it *is* effectively the reactor (e.g. tests).
//! `ThreadDriven` mode registers a software event and waits on a condition
//! variable with a predicate, the idiomatic equivalent of the original's
//! `wait_for(lock, kTimeout, predicate)`.

use crate::config::RuntimeProcessingMode;
use crate::error::abort_with_context;
use crate::reactor::Reactor;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Hard timeout for thread-driven mode. Exceeding it is a fatal violation
/// (invariant I7), never a silent failure.
pub const TIMEOUT: Duration = Duration::from_secs(10);

struct Shared<R> {
    done: Mutex<Option<R>>,
    condvar: Condvar,
}

/// Executes a closure on the reactor thread (or, in polling mode, on the
/// calling thread under a shared lock) and returns its result.
///
/// Only one invocation is in flight per `ReactorSyncTask` at a time; callers
/// must not call `run` concurrently from two threads on the same instance.
pub struct ReactorSyncTask<T: Send + 'static> {
    reactor: Reactor,
    mode: RuntimeProcessingMode,
    polling_lock: Arc<Mutex<()>>,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ReactorSyncTask<T> {
    pub fn new(reactor: Reactor, mode: RuntimeProcessingMode, polling_lock: Arc<Mutex<()>>) -> Self {
        Self {
            reactor,
            mode,
            polling_lock,
            shared: Arc::new(Shared {
                done: Mutex::new(None),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Runs `callable` according to this task's processing mode and returns
    /// its result. In thread-driven mode, a closure that the reactor never
    /// gets around to running within [`TIMEOUT`] aborts the process rather
    /// than returning — a late-firing callback after the caller has moved on
    /// risks exactly the memory corruption this contract exists to prevent.
    pub fn run<F>(&self, callable: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
    {
        match self.mode {
            RuntimeProcessingMode::Polling => {
                let _guard = self.polling_lock.lock();
                callable()
            }
            RuntimeProcessingMode::ThreadDriven => self.run_thread_driven(callable),
        }
    }

    fn run_thread_driven<F>(&self, callable: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
    {
        *self.shared.done.lock() = None;

        let shared = Arc::clone(&self.shared);
        let mut callable = Some(callable);
        let handle = self.reactor.register_software_event(move || {
            if let Some(callable) = callable.take() {
                let result = callable();
                *shared.done.lock() = Some(result);
                shared.condvar.notify_one();
            }
        });
        self.reactor.trigger(&handle);

        let mut guard = self.shared.done.lock();
        let timed_out = self
            .shared
            .condvar
            .wait_while_for(&mut guard, |done| done.is_none(), TIMEOUT)
            .timed_out();

        if timed_out && guard.is_none() {
            abort_with_context(
                "ReactorSyncTask timed out waiting for the reactor to run the scheduled closure",
            );
        }

        guard.take().expect("predicate guarantees a result is present")
    }
}
