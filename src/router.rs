//! # SkeletonRouter
//!
//! Maps a provided service instance to the backend router that implements
//! it (component C7). `ConnectionSkeleton` holds one shared `SkeletonRouter`
//! and consults it for every incoming message; `Server`/`ConnectionManagerSkeleton`
//! register and deregister backends as instances are offered and stopped.
//!
//! Registration is a configuration-time operation: a double-register or a
//! deregister of an instance that was never registered is an invariant
//! violation, not a recoverable error (design §7, "Configuration/invariant
//! violation -> abort"). Lookup misses during message routing, by contrast,
//! are routine (a client can race an offer going down) and surface as a
//! typed [`IpcCoreError::NoSuchServiceInstance`].

use crate::connection::skeleton::ConnectionSkeleton;
use crate::error::{IpcCoreError, Result};
use crate::message::{ConnectionId, EventHeader, InstanceId, MajorVersion, MethodHeader, ServiceId, ServiceInstanceIdentifier};
use parking_lot::Mutex;
use std::sync::Arc;

/// The subset of a [`ServiceInstanceIdentifier`] actually carried by an
/// incoming SOME/IP method or event header: minor version is negotiated at
/// offer/find time and never appears in a method call, so routing matches
/// on service/instance/major version only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: MajorVersion,
}

impl From<ServiceInstanceIdentifier> for RoutingKey {
    fn from(id: ServiceInstanceIdentifier) -> Self {
        Self {
            service_id: id.service_id,
            instance_id: id.instance_id,
            major_version: id.major_version,
        }
    }
}

impl From<MethodHeader> for RoutingKey {
    fn from(header: MethodHeader) -> Self {
        Self {
            service_id: header.service_id,
            instance_id: header.instance_id,
            major_version: header.major_version,
        }
    }
}

impl From<EventHeader> for RoutingKey {
    fn from(header: EventHeader) -> Self {
        Self {
            service_id: header.service_id,
            instance_id: header.instance_id,
            major_version: header.major_version,
        }
    }
}

/// The backend implementation for one provided service instance: the object
/// that actually executes method calls and tracks event subscriptions.
/// `ConnectionSkeleton` is the sole caller.
pub trait SkeletonBackendRouterInterface: Send + Sync {
    fn handle_method_request(&self, connection: &Arc<ConnectionSkeleton>, header: MethodHeader, payload: &[u8]);
    fn handle_method_no_return_request(&self, connection: &Arc<ConnectionSkeleton>, header: MethodHeader, payload: &[u8]);
    fn handle_subscribe_event(&self, connection: &Arc<ConnectionSkeleton>, header: EventHeader);
    fn handle_unsubscribe_event(&self, connection: &Arc<ConnectionSkeleton>, header: EventHeader);

    /// Scrubs every piece of per-connection state this backend holds
    /// (subscriptions, pending calls). Invariant I-router-scrub: after this
    /// returns, no future event published by this backend may reach
    /// `connection_id` again.
    fn remove_connection(&self, connection_id: ConnectionId);
}

struct Entry {
    id: ServiceInstanceIdentifier,
    backend: Arc<dyn SkeletonBackendRouterInterface>,
}

#[derive(Default)]
pub struct SkeletonRouter {
    entries: Mutex<Vec<Entry>>,
}

impl SkeletonRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` as the implementation of `id`. Aborts on a
    /// duplicate registration of the same instance.
    pub fn register(&self, id: ServiceInstanceIdentifier, backend: Arc<dyn SkeletonBackendRouterInterface>) {
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| entry.id == id) {
            crate::error::abort_with_context("duplicate backend router registration for the same service instance");
        }
        entries.push(Entry { id, backend });
    }

    /// Removes the backend registered for `id`. Aborts if none was
    /// registered.
    pub fn deregister(&self, id: ServiceInstanceIdentifier) {
        let mut entries = self.entries.lock();
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                entries.remove(index);
            }
            None => crate::error::abort_with_context("deregistered a service instance that was never registered"),
        }
    }

    /// Looks up the backend whose registered identifier matches `key` on
    /// service/instance/major-version. Used for routing incoming wire
    /// messages, which never carry a minor version.
    pub fn get(&self, key: RoutingKey) -> Result<Arc<dyn SkeletonBackendRouterInterface>> {
        self.entries
            .lock()
            .iter()
            .find(|entry| RoutingKey::from(entry.id) == key)
            .map(|entry| Arc::clone(&entry.backend))
            .ok_or_else(|| {
                IpcCoreError::NoSuchServiceInstance(ServiceInstanceIdentifier {
                    service_id: key.service_id,
                    instance_id: key.instance_id,
                    major_version: key.major_version,
                    minor_version: 0,
                })
            })
    }

    /// Notifies every registered backend that `connection_id` is gone
    /// (invariant I-router-scrub). Called once per connection teardown,
    /// regardless of how many service instances that connection had active
    /// subscriptions or calls against.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        for entry in self.entries.lock().iter() {
            entry.backend.remove_connection(connection_id);
        }
    }
}
