//! # AraComIpcBinding lifecycle
//!
//! The composition root (component C12): owns the reactor, the connection
//! manager, and the trace monitor for one process, and is the only type an
//! application constructs directly. Service discovery is an external
//! collaborator here (the design scopes SOME/IP-SD's network side out of
//! this core entirely — see `SPEC_FULL.md` §1); [`IpcServiceDiscovery`] is
//! the seam a real binding would plug a SOME/IP-SD client into, offering and
//! withdrawing instances as this binding's own offer/stop-offer calls fire.

use crate::access_control::AccessControl;
use crate::config::Config;
use crate::connection::ConnectionManagerSkeleton;
use crate::error::Result;
use crate::ipc::Acceptor;
use crate::message::{IpcUnicastAddress, ProvidedServiceInstanceId, ServiceInstanceIdentifier};
use crate::reactor::Reactor;
use crate::router::{SkeletonBackendRouterInterface, SkeletonRouter};
use crate::trace::TraceMonitor;
use std::sync::Arc;

/// Announces and withdraws offered instances to the wider system. Not
/// implemented here: a production binding would back this with a SOME/IP-SD
/// client, a D-Bus broadcaster, or similar, none of which are part of the
/// ECU-internal core this crate implements.
pub trait IpcServiceDiscovery: Send + Sync {
    fn offer_service(&self, id: ServiceInstanceIdentifier, address: IpcUnicastAddress);
    fn stop_offer_service(&self, id: ServiceInstanceIdentifier);
}

pub struct AraComIpcBinding {
    reactor: Reactor,
    connection_manager: ConnectionManagerSkeleton,
    trace: Arc<TraceMonitor>,
    config: Config,
    service_discovery: Option<Arc<dyn IpcServiceDiscovery>>,
}

impl AraComIpcBinding {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_access_control(config, Arc::new(crate::access_control::AllowAll))
    }

    /// Same as [`Self::new`], but installs `access_control` instead of the
    /// default allow-everything policy from the start — every server this
    /// binding ever creates consults it.
    pub fn with_access_control(config: Config, access_control: Arc<dyn AccessControl>) -> anyhow::Result<Self> {
        let reactor = Reactor::start()?;
        let trace = Arc::new(TraceMonitor::new());
        let router = Arc::new(SkeletonRouter::new());
        let connection_manager = ConnectionManagerSkeleton::with_access_control(reactor.clone(), router, Arc::clone(&trace), access_control);
        Ok(Self {
            reactor,
            connection_manager,
            trace,
            config,
            service_discovery: None,
        })
    }

    pub fn set_service_discovery(&mut self, service_discovery: Arc<dyn IpcServiceDiscovery>) {
        self.service_discovery = Some(service_discovery);
    }

    pub fn reactor(&self) -> Reactor {
        self.reactor.clone()
    }

    pub fn trace_monitor(&self) -> Arc<TraceMonitor> {
        Arc::clone(&self.trace)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts (or reuses) the server at `address`, offers `id` on it, and
    /// announces it to service discovery. Fails with
    /// [`crate::error::IpcCoreError::AlreadyOffered`] if `id` is already
    /// offered anywhere in this process.
    pub async fn offer_service_instance(
        &self,
        address: IpcUnicastAddress,
        acceptor: Arc<dyn Acceptor>,
        id: ProvidedServiceInstanceId,
        backend: Arc<dyn SkeletonBackendRouterInterface>,
    ) -> Result<()> {
        self.connection_manager.get_or_create_server(address, acceptor).await?;
        self.connection_manager.offer_service_instance(address, id, backend)?;
        if let Some(service_discovery) = &self.service_discovery {
            service_discovery.offer_service(id.service_instance, address);
        }
        Ok(())
    }

    pub fn stop_offer_service_instance(&self, address: IpcUnicastAddress, id: ProvidedServiceInstanceId) {
        self.connection_manager.stop_offering_service_instance(address, id);
        if let Some(service_discovery) = &self.service_discovery {
            service_discovery.stop_offer_service(id.service_instance);
        }
    }

    pub async fn shutdown(&self, address: IpcUnicastAddress) {
        self.connection_manager.disconnect_server(address).await;
    }
}
