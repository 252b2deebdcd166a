//! # ConnectionManagerSkeleton
//!
//! Owns every [`Server`] this process runs, keyed by local
//! [`IpcUnicastAddress`] (component C9). Multiple provided service instances
//! commonly share one listening address, so `offer_service_instance` adds an
//! instance to whichever server already owns that address rather than
//! requiring one server per instance; it also enforces that the same
//! instance is never offered twice anywhere in the process, matching the
//! original's duplicate-offer check in `connection_manager_skeleton.h`.

use crate::access_control::{AccessControl, AllowAll};
use crate::error::{IpcCoreError, Result};
use crate::ipc::Acceptor;
use crate::message::{IpcUnicastAddress, ProvidedServiceInstanceId};
use crate::reactor::Reactor;
use crate::router::{SkeletonBackendRouterInterface, SkeletonRouter};
use crate::trace::TraceMonitor;
use parking_lot::Mutex;
use std::sync::Arc;

use super::server::Server;

struct Entry {
    address: IpcUnicastAddress,
    server: Arc<Server>,
}

pub struct ConnectionManagerSkeleton {
    reactor: Reactor,
    router: Arc<SkeletonRouter>,
    trace: Arc<TraceMonitor>,
    access_control: Arc<dyn AccessControl>,
    servers: Mutex<Vec<Entry>>,
}

impl ConnectionManagerSkeleton {
    pub fn new(reactor: Reactor, router: Arc<SkeletonRouter>, trace: Arc<TraceMonitor>) -> Self {
        Self::with_access_control(reactor, router, trace, Arc::new(AllowAll))
    }

    pub fn with_access_control(
        reactor: Reactor,
        router: Arc<SkeletonRouter>,
        trace: Arc<TraceMonitor>,
        access_control: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            reactor,
            router,
            trace,
            access_control,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the server already listening at `address`, creating and
    /// starting one with `acceptor` if none exists yet.
    pub async fn get_or_create_server(&self, address: IpcUnicastAddress, acceptor: Arc<dyn Acceptor>) -> Result<Arc<Server>> {
        if let Some(entry) = self.servers.lock().iter().find(|entry| entry.address == address) {
            return Ok(Arc::clone(&entry.server));
        }
        let server = Server::new(
            acceptor,
            self.reactor.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.trace),
            Arc::clone(&self.access_control),
        );
        server
            .start()
            .await
            .map_err(|error| IpcCoreError::TransportFatal(error.to_string()))?;
        self.servers.lock().push(Entry { address, server: Arc::clone(&server) });
        Ok(server)
    }

    /// Offers `id` on `address`'s server, registering `backend` as the
    /// implementation that will handle every method call and subscription
    /// routed to it. Fails with [`IpcCoreError::AlreadyOffered`] if `id` is
    /// already offered anywhere in the process, on this address or another.
    pub fn offer_service_instance(
        &self,
        address: IpcUnicastAddress,
        id: ProvidedServiceInstanceId,
        backend: Arc<dyn SkeletonBackendRouterInterface>,
    ) -> Result<()> {
        let servers = self.servers.lock();
        if servers.iter().any(|entry| entry.server.has_provided_service_instance(&id)) {
            return Err(IpcCoreError::AlreadyOffered(id));
        }
        let entry = servers
            .iter()
            .find(|entry| entry.address == address)
            .ok_or_else(|| IpcCoreError::TransportFatal(format!("no server listening at {address:?}")))?;
        self.router.register(id.service_instance, backend);
        entry.server.add_provided_service_instance(id);
        Ok(())
    }

    pub fn stop_offering_service_instance(&self, address: IpcUnicastAddress, id: ProvidedServiceInstanceId) {
        if let Some(entry) = self.servers.lock().iter().find(|entry| entry.address == address) {
            entry.server.remove_provided_service_instance(id);
            self.router.deregister(id.service_instance);
        }
    }

    /// Stops and removes the server listening at `address`, if any.
    pub async fn disconnect_server(&self, address: IpcUnicastAddress) {
        let removed = {
            let mut servers = self.servers.lock();
            servers
                .iter()
                .position(|entry| entry.address == address)
                .map(|index| servers.remove(index))
        };
        if let Some(entry) = removed {
            entry.server.stop().await;
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::TransportError;
    use async_trait::async_trait;

    struct NeverAcceptsAcceptor;

    #[async_trait]
    impl Acceptor for NeverAcceptsAcceptor {
        async fn init(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn accept(&self) -> std::result::Result<Box<dyn crate::ipc::TransportEndpoint>, TransportError> {
            std::future::pending().await
        }
        async fn close(&self) {}
        fn is_in_use(&self) -> bool {
            false
        }
    }

    fn address(port: u32) -> IpcUnicastAddress {
        IpcUnicastAddress { domain: 0, port }
    }

    fn provided_instance(instance_id: u16) -> ProvidedServiceInstanceId {
        ProvidedServiceInstanceId {
            service_instance: crate::message::ServiceInstanceIdentifier {
                service_id: 1,
                instance_id,
                major_version: 1,
                minor_version: 0,
            },
            provenance: crate::message::InstanceProvenance::Generated,
        }
    }

    #[tokio::test]
    async fn second_server_creation_at_same_address_reuses_the_first() {
        let reactor = Reactor::start().unwrap();
        let manager = ConnectionManagerSkeleton::new(reactor, Arc::new(SkeletonRouter::new()), Arc::new(TraceMonitor::new()));
        let a = manager.get_or_create_server(address(1), Arc::new(NeverAcceptsAcceptor)).await.unwrap();
        let b = manager.get_or_create_server(address(1), Arc::new(NeverAcceptsAcceptor)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.server_count(), 1);
    }

    #[tokio::test]
    async fn offering_the_same_instance_twice_is_rejected() {
        let reactor = Reactor::start().unwrap();
        let manager = ConnectionManagerSkeleton::new(reactor, Arc::new(SkeletonRouter::new()), Arc::new(TraceMonitor::new()));
        manager.get_or_create_server(address(1), Arc::new(NeverAcceptsAcceptor)).await.unwrap();
        let instance = provided_instance(1);
        manager.offer_service_instance(address(1), instance, Arc::new(NullBackend)).unwrap();
        let result = manager.offer_service_instance(address(1), instance, Arc::new(NullBackend));
        assert!(matches!(result, Err(IpcCoreError::AlreadyOffered(_))));
    }

    struct NullBackend;

    impl SkeletonBackendRouterInterface for NullBackend {
        fn handle_method_request(
            &self,
            _connection: &Arc<crate::connection::skeleton::ConnectionSkeleton>,
            _header: crate::message::MethodHeader,
            _payload: &[u8],
        ) {
        }
        fn handle_method_no_return_request(
            &self,
            _connection: &Arc<crate::connection::skeleton::ConnectionSkeleton>,
            _header: crate::message::MethodHeader,
            _payload: &[u8],
        ) {
        }
        fn handle_subscribe_event(
            &self,
            _connection: &Arc<crate::connection::skeleton::ConnectionSkeleton>,
            _header: crate::message::EventHeader,
        ) {
        }
        fn handle_unsubscribe_event(
            &self,
            _connection: &Arc<crate::connection::skeleton::ConnectionSkeleton>,
            _header: crate::message::EventHeader,
        ) {
        }
        fn remove_connection(&self, _connection_id: crate::message::ConnectionId) {}
    }
}
