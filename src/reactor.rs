//! # Reactor
//!
//! The reactor is nominally an external collaborator (component C2): a
//! single-threaded cooperative event loop providing I/O readiness, software
//! events, and one-shot timers. Unlike the transport, there is no ecosystem
//! crate that hands us this primitive ready-made, so this module supplies
//! the minimal concrete reactor the rest of the core needs to actually run:
//! a dedicated OS thread driving a single-threaded Tokio runtime.
//!
//! Running every task on one `current_thread` runtime is what gives us the
//! "single-threaded cooperative reactor" property of §5 — task bodies are
//! ordinary `Send` futures (there is no need to forbid `Send` to get
//! single-threadedness; `current_thread` already guarantees only one worker
//! ever polls them), which keeps the implementation a thin wrapper over
//! `tokio::runtime::Handle` instead of a bespoke executor.
//!
//! A *software event* is a reactor-schedulable token: [`Reactor::register_software_event`]
//! installs a handler, [`Reactor::trigger`] schedules it to run once on the
//! reactor thread, and the returned [`SoftwareEventHandle`] unregisters the
//! handler when dropped (design §9: "handles are owned and
//! unregister-on-drop").

use crate::error::abort_with_context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type HandlerFn = Box<dyn FnMut() + Send + 'static>;

struct Registry {
    next_id: AtomicU64,
    /// `None` in place of a handler marks it as currently running (taken out
    /// of the map for the duration of the call, see `trigger`) without
    /// removing its key — a handler that unregisters itself mid-call still
    /// finds its id present and removes it cleanly.
    handlers: Mutex<HashMap<u64, Option<HandlerFn>>>,
}

/// A handle to a registered software event. Dropping it unregisters the
/// handler; failure to find it during unregistration is an invariant
/// violation (it would mean double-unregister or use-after-unregister) and
/// aborts the process per the design's error taxonomy.
pub struct SoftwareEventHandle {
    id: Option<u64>,
    registry: Arc<Registry>,
}

impl SoftwareEventHandle {
    fn unregister_now(&mut self) {
        if let Some(id) = self.id.take() {
            if self.registry.handlers.lock().remove(&id).is_none() {
                abort_with_context("software event handle unregistered twice or never registered");
            }
        }
    }

    /// Explicitly unregister. Equivalent to dropping the handle, but lets a
    /// caller observe the point at which it happens.
    pub fn close(mut self) {
        self.unregister_now();
    }
}

impl Drop for SoftwareEventHandle {
    fn drop(&mut self) {
        self.unregister_now();
    }
}

/// A dedicated-thread, single-threaded cooperative reactor.
#[derive(Clone)]
pub struct Reactor {
    handle: tokio::runtime::Handle,
    registry: Arc<Registry>,
    shutdown: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl Reactor {
    /// Spawns the dedicated reactor thread and blocks the calling thread
    /// until its runtime is ready to accept work.
    pub fn start() -> anyhow::Result<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        std::thread::Builder::new()
            .name("ara-com-reactor".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async move {
                    let _ = shutdown_rx.await;
                });
            })?;

        let handle = handle_rx.recv()??;
        Ok(Self {
            handle,
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: Mutex::new(HashMap::new()),
            }),
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        })
    }

    /// Schedules `future` to run on the reactor thread. Callable from any
    /// thread.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    /// Registers a handler that runs on the reactor thread each time the
    /// returned handle is triggered.
    pub fn register_software_event<H>(&self, handler: H) -> SoftwareEventHandle
    where
        H: FnMut() + Send + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.lock().insert(id, Some(Box::new(handler)));
        SoftwareEventHandle {
            id: Some(id),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Schedules the handler behind `handle` to run once, on the reactor
    /// thread. Callable from any thread, including the reactor thread
    /// itself (the handler runs on the next tick, not reentrantly).
    ///
    /// The handler is taken out of the registry before it runs and put back
    /// afterward, so the registry lock is never held across the call — a
    /// handler that unregisters its own handle (or anyone else's) from
    /// within the call does not deadlock against this same lock.
    pub fn trigger(&self, handle: &SoftwareEventHandle) {
        let Some(id) = handle.id else {
            abort_with_context("attempted to trigger an already-unregistered software event");
        };
        let registry = Arc::clone(&self.registry);
        self.handle.spawn(async move {
            let taken = registry.handlers.lock().get_mut(&id).and_then(Option::take);
            let Some(mut handler) = taken else {
                return;
            };
            handler();
            if let Some(slot) = registry.handlers.lock().get_mut(&id) {
                *slot = Some(handler);
            }
        });
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}
