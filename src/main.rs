//! # ara::com IPC Binding Demo Host
//!
//! A minimal skeleton-side process exercising the binding end-to-end: it
//! offers one service instance over a Unix domain socket, echoes every
//! method request back as a `Response`, and runs until interrupted.
//!
//! ## Architecture
//!
//! 1. Initialize logging (file + colorized stdout, mirroring this crate's
//!    established `tracing`/`tracing-appender` setup).
//! 2. Parse CLI arguments.
//! 3. Construct an [`AraComIpcBinding`] and offer the demo instance.
//! 4. Block on Ctrl+C, then shut down.

use ara_com_ipc_binding::config::Config;
use ara_com_ipc_binding::connection::ConnectionSkeleton;
use ara_com_ipc_binding::ipc::UnixDomainSocketAcceptor;
use ara_com_ipc_binding::lifecycle::AraComIpcBinding;
use ara_com_ipc_binding::message::{
    ConnectionId, EventHeader, InstanceProvenance, IpcPacket, IpcUnicastAddress, MethodHeader,
    ProvidedServiceInstanceId, ReturnCode, ServiceInstanceIdentifier, VariantHeader,
};
use ara_com_ipc_binding::router::SkeletonBackendRouterInterface;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod cli;
mod logging;

use cli::Args;
use logging::ColorizedFormatter;

const DEMO_SERVICE_ID: u16 = 0x1001;
const DEMO_INSTANCE_ID: u16 = 0x0001;
const DEMO_MAJOR_VERSION: u8 = 1;

/// Echoes every method request back as a `Response` carrying the same
/// payload, and acknowledges every subscribe with an immediate ack — enough
/// surface to drive the binding's routing and framing without any real
/// application logic behind it.
struct EchoBackend;

impl SkeletonBackendRouterInterface for EchoBackend {
    fn handle_method_request(&self, connection: &Arc<ConnectionSkeleton>, header: MethodHeader, payload: &[u8]) {
        let response = IpcPacket::new(VariantHeader::Response(header), ReturnCode::Ok, payload.to_vec());
        connection.send(response);
    }

    fn handle_method_no_return_request(&self, _connection: &Arc<ConnectionSkeleton>, header: MethodHeader, _payload: &[u8]) {
        info!(method_id = header.method_id, "fire-and-forget request received");
    }

    fn handle_subscribe_event(&self, connection: &Arc<ConnectionSkeleton>, header: EventHeader) {
        connection.send(IpcPacket::new(VariantHeader::SubscribeEventAck(header), ReturnCode::Ok, Vec::new()));
    }

    fn handle_unsubscribe_event(&self, _connection: &Arc<ConnectionSkeleton>, _header: EventHeader) {}

    fn remove_connection(&self, _connection_id: ConnectionId) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file_appender = tracing_appender::rolling::daily(".", "ara-com-ipc-demo.log");
    let (non_blocking_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let detailed_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(log_level)
        .boxed();

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    info!("starting ara::com IPC binding demo host");

    let mut config = Config::default();
    config.tp_monotonic_buffer_size = args.tp_monotonic_buffer_size;

    let binding = AraComIpcBinding::new(config)?;
    let address = IpcUnicastAddress { domain: 0, port: 0 };
    let acceptor = Arc::new(UnixDomainSocketAcceptor::new(&args.listen_path));

    let instance = ProvidedServiceInstanceId {
        service_instance: ServiceInstanceIdentifier {
            service_id: DEMO_SERVICE_ID,
            instance_id: DEMO_INSTANCE_ID,
            major_version: DEMO_MAJOR_VERSION,
            minor_version: 0,
        },
        provenance: InstanceProvenance::Generated,
    };

    binding
        .offer_service_instance(address, acceptor, instance, Arc::new(EchoBackend))
        .await?;
    info!(path = %args.listen_path.display(), "listening for connections");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    binding.shutdown(address).await;

    Ok(())
}
