//! # ConnectionSkeleton
//!
//! One accepted connection's full lifecycle (component C6): decodes
//! incoming [`IpcPacket`]s off a [`ConnectionMessageHandler`], routes them
//! through the shared [`SkeletonRouter`], and tears itself down exactly once
//! when the transport reports a fatal error.
//!
//! Every connection gets a process-wide unique id from a single atomic
//! counter (`connection_manager_skeleton.h`'s `CreateNextId()`), not a
//! per-server counter — ids must stay unique across every listening server
//! this process owns, since `SkeletonRouter::remove_connection` fans a
//! single id out to every registered backend regardless of which server
//! accepted it.
//!
//! Teardown is deferred onto the reactor and scheduled through a
//! *persistent* software event rather than the ad hoc `Reactor::spawn` the
//! message handler uses: the event closure explicitly unregisters (`close`)
//! itself once it has run, rather than relying on `Drop`, because the
//! closure captures an `Arc<Self>` and `Self` holds the handle — a drop-only
//! unregister would never run (the reactor's registry would keep the
//! `ConnectionSkeleton` alive forever through that captured `Arc`).

use crate::access_control::AccessControl;
use crate::connection::message_handler::ConnectionMessageHandler;
use crate::ipc::{TransportEndpoint, TransportError};
use crate::message::{
    ConnectionId, EventHeader, IpcPacket, MethodHeader, ReturnCode, ServiceInstanceIdentifier, VariantHeader,
};
use crate::reactor::{Reactor, SoftwareEventHandle};
use crate::router::{RoutingKey, SkeletonRouter};
use crate::trace::{Direction, TraceMonitor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Live,
    Terminated,
}

pub type TerminatedCallback = Box<dyn Fn(ConnectionId) + Send + Sync>;

pub struct ConnectionSkeleton {
    id: ConnectionId,
    message_handler: Arc<ConnectionMessageHandler>,
    router: Arc<SkeletonRouter>,
    trace: Arc<TraceMonitor>,
    access_control: Arc<dyn AccessControl>,
    reactor: Reactor,
    state: Mutex<LifecycleState>,
    teardown_event: Mutex<Option<SoftwareEventHandle>>,
    on_terminated: Mutex<Option<TerminatedCallback>>,
}

impl ConnectionSkeleton {
    pub fn create(
        transport: Arc<dyn TransportEndpoint>,
        reactor: Reactor,
        router: Arc<SkeletonRouter>,
        trace: Arc<TraceMonitor>,
        access_control: Arc<dyn AccessControl>,
    ) -> Arc<Self> {
        let id = next_connection_id();
        let message_handler = ConnectionMessageHandler::new(transport, reactor.clone());

        let skeleton = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_error = Weak::clone(weak);
            message_handler.set_on_error(Box::new(move |error: &TransportError| {
                if let Some(this) = weak_error.upgrade() {
                    this.on_transport_error(error);
                }
            }));

            let weak_message = Weak::clone(weak);
            message_handler.set_on_message(Box::new(move |packet: IpcPacket| {
                if let Some(this) = weak_message.upgrade() {
                    this.on_message(packet);
                }
            }));

            Self {
                id,
                message_handler,
                router,
                trace,
                access_control,
                reactor,
                state: Mutex::new(LifecycleState::Live),
                teardown_event: Mutex::new(None),
                on_terminated: Mutex::new(None),
            }
        });

        skeleton.message_handler.start_reception();
        skeleton
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        *self.state.lock() == LifecycleState::Live
    }

    /// Registers the callback invoked once, on the reactor thread, after
    /// this connection has fully torn down and scrubbed itself out of the
    /// router. `Server` uses this to move the skeleton from its live set
    /// into the terminated set awaiting reap.
    pub fn set_on_terminated(&self, callback: TerminatedCallback) {
        *self.on_terminated.lock() = Some(callback);
    }

    /// Traces the outbound packet (every variant a skeleton-side connection
    /// ever sends) before handing it to the message handler, matching
    /// `connection_skeleton.h`'s typed send helpers, each of which calls its
    /// `TraceMonitor` counterpart before `ConnectionMessageHandler::Send`.
    pub fn send(self: &Arc<Self>, packet: IpcPacket) {
        match &packet.variant {
            VariantHeader::Response(header) => self.trace.trace_method_response(*header, Direction::Tx, packet.get_packet()),
            VariantHeader::ErrorResponse(header) => self.trace.trace_method_error_response(*header, Direction::Tx, packet.get_packet()),
            VariantHeader::ApplicationError(header, _) => self.trace.trace_application_error(*header, Direction::Tx, packet.get_packet()),
            VariantHeader::Notification(header, session_id) => {
                self.trace.trace_notification(*header, *session_id, Direction::Tx, packet.get_packet())
            }
            VariantHeader::SubscribeEventAck(header) => self.trace.trace_subscribe_event_ack(*header, Direction::Tx),
            VariantHeader::SubscribeEventNAck(header) => self.trace.trace_subscribe_event_nack(*header, Direction::Tx),
            // Request/RequestNoReturn/SubscribeEvent/UnsubscribeEvent never
            // flow skeleton-to-client; a backend sending one of those would
            // be a misuse this trace point has no obligation to cover.
            VariantHeader::Request(_) | VariantHeader::RequestNoReturn(_) | VariantHeader::SubscribeEvent(_) | VariantHeader::UnsubscribeEvent(_) => {}
        }
        self.message_handler.send(packet);
    }

    fn on_message(self: &Arc<Self>, packet: IpcPacket) {
        match packet.variant {
            VariantHeader::Request(header) => self.dispatch_request(header, &packet),
            VariantHeader::RequestNoReturn(header) => self.dispatch_request_no_return(header, &packet),
            VariantHeader::SubscribeEvent(header) => self.dispatch_subscribe(header),
            VariantHeader::UnsubscribeEvent(header) => self.dispatch_unsubscribe(header),
            // A skeleton-side connection never receives Response,
            // ErrorResponse, ApplicationError, Notification,
            // SubscribeEventAck, or SubscribeEventNAck: those flow the other
            // direction. Anything of that shape arriving here is a protocol
            // violation — logged and discarded, the connection stays open.
            other => {
                tracing::warn!(connection_id = self.id, variant = ?other, "unexpected message direction; discarding");
            }
        }
    }

    fn instance_of(header: MethodHeader) -> ServiceInstanceIdentifier {
        ServiceInstanceIdentifier {
            service_id: header.service_id,
            instance_id: header.instance_id,
            major_version: header.major_version,
            minor_version: 0,
        }
    }

    fn dispatch_request(self: &Arc<Self>, header: MethodHeader, packet: &IpcPacket) {
        self.trace.trace_method_call(header, Direction::Rx, packet.get_packet());

        let peer = self.message_handler.peer_credentials();
        if !self.access_control.check_method_request(peer, Self::instance_of(header), header.method_id) {
            tracing::warn!(
                connection_id = self.id,
                peer = %peer,
                method_id = header.method_id,
                "request denied by access control; replying with ErrorResponse"
            );
            let response = IpcPacket::new(VariantHeader::ErrorResponse(header), ReturnCode::NotOk, Vec::new());
            self.send(response);
            return;
        }

        match self.router.get(RoutingKey::from(header)) {
            Ok(backend) => backend.handle_method_request(self, header, packet.get_packet()),
            Err(_) => {
                tracing::warn!(
                    connection_id = self.id,
                    service_id = header.service_id,
                    instance_id = header.instance_id,
                    "request for unknown service instance; replying with ErrorResponse"
                );
                let response = IpcPacket::new(VariantHeader::ErrorResponse(header), ReturnCode::NotOk, Vec::new());
                self.send(response);
            }
        }
    }

    fn dispatch_request_no_return(self: &Arc<Self>, header: MethodHeader, packet: &IpcPacket) {
        self.trace.trace_method_no_return_call(header, Direction::Rx, packet.get_packet());

        let peer = self.message_handler.peer_credentials();
        if !self.access_control.check_method_request(peer, Self::instance_of(header), header.method_id) {
            tracing::warn!(connection_id = self.id, peer = %peer, method_id = header.method_id, "fire-and-forget request denied by access control");
            return;
        }

        if let Ok(backend) = self.router.get(RoutingKey::from(header)) {
            backend.handle_method_no_return_request(self, header, packet.get_packet());
        } else {
            tracing::warn!(
                connection_id = self.id,
                service_id = header.service_id,
                "fire-and-forget request for unknown service instance; discarding"
            );
        }
    }

    fn dispatch_subscribe(self: &Arc<Self>, header: EventHeader) {
        self.trace.trace_subscribe_event(header, Direction::Rx);
        match self.router.get(RoutingKey::from(header)) {
            Ok(backend) => backend.handle_subscribe_event(self, header),
            Err(_) => {
                let response = IpcPacket::new(VariantHeader::SubscribeEventNAck(header), ReturnCode::NotOk, Vec::new());
                self.send(response);
            }
        }
    }

    fn dispatch_unsubscribe(self: &Arc<Self>, header: EventHeader) {
        self.trace.trace_unsubscribe_event(header, Direction::Rx);
        if let Ok(backend) = self.router.get(RoutingKey::from(header)) {
            backend.handle_unsubscribe_event(self, header);
        }
    }

    /// Transitions this connection into terminated state exactly once and
    /// schedules deferred cleanup on the reactor. Idempotent: a second
    /// transport error (send-path and receive-path can both fire) after the
    /// first is a no-op (invariant I-once-only-error at the connection
    /// level, layered on top of the message handler's own instance of it).
    fn on_transport_error(self: &Arc<Self>, _error: &TransportError) {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Terminated {
                return;
            }
            *state = LifecycleState::Terminated;
        }

        let this = Arc::clone(self);
        let handle = self.reactor.register_software_event(move || {
            this.router.remove_connection(this.id);
            if let Some(callback) = this.on_terminated.lock().as_ref() {
                callback(this.id);
            }
            if let Some(handle) = this.teardown_event.lock().take() {
                handle.close();
            }
        });
        self.reactor.trigger(&handle);
        *self.teardown_event.lock() = Some(handle);
    }
}
