//! # Server
//!
//! Owns one listening [`Acceptor`] and every [`ConnectionSkeleton`] accepted
//! on it (component C8), plus the set of provided service instances offered
//! at this address. Accepted connections move from the live set to the
//! terminated set on disconnect and are reaped (dropped) on the next
//! deferred pass rather than removed synchronously from inside the
//! terminate callback, mirroring the original's live/terminated split in
//! `server.h` — a skeleton tearing itself down must not free its own
//! backing `Arc` while still executing a callback that came from it.

use crate::access_control::AccessControl;
use crate::ipc::{Acceptor, TransportEndpoint};
use crate::message::ProvidedServiceInstanceId;
use crate::reactor::Reactor;
use crate::router::SkeletonRouter;
use crate::trace::TraceMonitor;
use parking_lot::Mutex;
use std::sync::Arc;

use super::skeleton::ConnectionSkeleton;

struct State {
    provided_instances: Vec<ProvidedServiceInstanceId>,
    live: Vec<Arc<ConnectionSkeleton>>,
    terminated: Vec<Arc<ConnectionSkeleton>>,
}

pub struct Server {
    acceptor: Arc<dyn Acceptor>,
    reactor: Reactor,
    router: Arc<SkeletonRouter>,
    trace: Arc<TraceMonitor>,
    access_control: Arc<dyn AccessControl>,
    state: Mutex<State>,
}

impl Server {
    pub fn new(
        acceptor: Arc<dyn Acceptor>,
        reactor: Reactor,
        router: Arc<SkeletonRouter>,
        trace: Arc<TraceMonitor>,
        access_control: Arc<dyn AccessControl>,
    ) -> Arc<Self> {
        Arc::new(Self {
            acceptor,
            reactor,
            router,
            trace,
            access_control,
            state: Mutex::new(State {
                provided_instances: Vec::new(),
                live: Vec::new(),
                terminated: Vec::new(),
            }),
        })
    }

    /// Initializes the acceptor and starts the accept loop on the reactor.
    /// Each accepted transport becomes a new live `ConnectionSkeleton`.
    pub async fn start(self: &Arc<Self>) -> Result<(), crate::ipc::TransportError> {
        self.acceptor.init().await?;
        let this = Arc::clone(self);
        self.reactor.spawn(async move {
            this.accept_loop().await;
        });
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>) {
        loop {
            match self.acceptor.accept().await {
                Ok(transport) => self.on_accepted(Arc::from(transport)),
                Err(error) => {
                    tracing::warn!(error = %error, "acceptor reported an error; accept loop stopping");
                    return;
                }
            }
        }
    }

    fn on_accepted(self: &Arc<Self>, transport: Arc<dyn TransportEndpoint>) {
        let skeleton = ConnectionSkeleton::create(
            transport,
            self.reactor.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.trace),
            Arc::clone(&self.access_control),
        );
        let this = Arc::clone(self);
        let connection_id = skeleton.id();
        skeleton.set_on_terminated(Box::new(move |_id| {
            this.on_disconnect(connection_id);
        }));
        self.state.lock().live.push(skeleton);
    }

    /// Moves a terminated connection from `live` into `terminated`. Reaping
    /// (actually dropping the `Arc`) happens on the next call that touches
    /// `terminated`, not here — this runs from inside the skeleton's own
    /// deferred-teardown software event, so dropping its last strong
    /// reference synchronously would drop `Self` from within its own
    /// callback.
    fn on_disconnect(&self, connection_id: crate::message::ConnectionId) {
        let mut state = self.state.lock();
        if let Some(index) = state.live.iter().position(|c| c.id() == connection_id) {
            let skeleton = state.live.remove(index);
            state.terminated.push(skeleton);
        }
        reap_terminated(&mut state);
    }

    pub fn add_provided_service_instance(&self, id: ProvidedServiceInstanceId) {
        self.state.lock().provided_instances.push(id);
    }

    pub fn remove_provided_service_instance(&self, id: ProvidedServiceInstanceId) {
        let mut state = self.state.lock();
        state.provided_instances.retain(|existing| *existing != id);
    }

    pub fn has_provided_service_instance(&self, id: &ProvidedServiceInstanceId) -> bool {
        self.state.lock().provided_instances.iter().any(|existing| existing == id)
    }

    pub fn live_connection_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub async fn stop(&self) {
        self.acceptor.close().await;
    }
}

/// Drops every skeleton in the terminated set. Pulled out as a free
/// function since it only needs `&mut State`, already held by every caller.
fn reap_terminated(state: &mut State) {
    state.terminated.clear();
}
