//! End-to-end coverage over a real `UnixDomainSocketAcceptor`/
//! `UnixDomainSocketEndpoint` pair and a live `AraComIpcBinding`: a raw
//! client connects, frames its own packets exactly like
//! `UnixDomainSocketEndpoint` does, and exercises the request/response,
//! access-control, and subscribe/notify/disconnect scenarios this crate's
//! lineage ran as manual test plans against the original binding.

use ara_com_ipc_binding::access_control::AccessControl;
use ara_com_ipc_binding::config::Config;
use ara_com_ipc_binding::connection::ConnectionSkeleton;
use ara_com_ipc_binding::ipc::{PeerCredentials, UnixDomainSocketAcceptor};
use ara_com_ipc_binding::lifecycle::AraComIpcBinding;
use ara_com_ipc_binding::message::{
    ConnectionId, EventHeader, InstanceProvenance, IpcPacket, IpcUnicastAddress, MethodHeader,
    MethodId, ProvidedServiceInstanceId, ReturnCode, ServiceInstanceIdentifier, VariantHeader,
};
use ara_com_ipc_binding::router::SkeletonBackendRouterInterface;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const SERVICE_ID: u16 = 0x4242;
const INSTANCE_ID: u16 = 0x0001;
const MAJOR_VERSION: u8 = 1;
const ALLOWED_METHOD: MethodId = 0x0001;
const DENIED_METHOD: MethodId = 0x0002;

fn instance_id() -> ProvidedServiceInstanceId {
    ProvidedServiceInstanceId {
        service_instance: ServiceInstanceIdentifier {
            service_id: SERVICE_ID,
            instance_id: INSTANCE_ID,
            major_version: MAJOR_VERSION,
            minor_version: 0,
        },
        provenance: InstanceProvenance::Generated,
    }
}

fn method_header(method_id: MethodId, session_id: u16) -> MethodHeader {
    MethodHeader {
        service_id: SERVICE_ID,
        instance_id: INSTANCE_ID,
        major_version: MAJOR_VERSION,
        method_id,
        client_id: 7,
        session_id,
    }
}

fn event_header() -> EventHeader {
    EventHeader {
        service_id: SERVICE_ID,
        instance_id: INSTANCE_ID,
        major_version: MAJOR_VERSION,
        event_id: 0x8001,
        client_id: 7,
    }
}

/// Writes one length-prefixed `IpcPacket`, the same framing
/// `UnixDomainSocketEndpoint` uses.
async fn send_packet(stream: &mut UnixStream, packet: &IpcPacket) {
    let bytes = packet.to_bytes().unwrap();
    stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
    stream.write_all(&bytes).await.unwrap();
}

async fn recv_packet(stream: &mut UnixStream) -> IpcPacket {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    IpcPacket::from_bytes(&buf).unwrap()
}

/// Echoes method calls, acks subscriptions, and counts how many times the
/// router scrubbed this backend's connection on disconnect.
struct EchoBackend {
    requests_seen: AtomicUsize,
    disconnects_seen: AtomicUsize,
}

impl EchoBackend {
    fn new() -> Self {
        Self {
            requests_seen: AtomicUsize::new(0),
            disconnects_seen: AtomicUsize::new(0),
        }
    }
}

impl SkeletonBackendRouterInterface for EchoBackend {
    fn handle_method_request(&self, connection: &Arc<ConnectionSkeleton>, header: MethodHeader, payload: &[u8]) {
        self.requests_seen.fetch_add(1, Ordering::SeqCst);
        let response = IpcPacket::new(VariantHeader::Response(header), ReturnCode::Ok, payload.to_vec());
        connection.send(response);
    }

    fn handle_method_no_return_request(&self, _connection: &Arc<ConnectionSkeleton>, _header: MethodHeader, _payload: &[u8]) {}

    fn handle_subscribe_event(&self, connection: &Arc<ConnectionSkeleton>, header: EventHeader) {
        connection.send(IpcPacket::new(VariantHeader::SubscribeEventAck(header), ReturnCode::Ok, Vec::new()));
    }

    fn handle_unsubscribe_event(&self, _connection: &Arc<ConnectionSkeleton>, _header: EventHeader) {}

    fn remove_connection(&self, _connection_id: ConnectionId) {
        self.disconnects_seen.fetch_add(1, Ordering::SeqCst);
    }
}

/// Denies `DENIED_METHOD` for every peer and allows everything else,
/// letting one test exercise both the happy path and the deny path against
/// the same running binding.
struct DenyOneMethod;

impl AccessControl for DenyOneMethod {
    fn check_method_request(&self, _peer: PeerCredentials, _service_instance: ServiceInstanceIdentifier, method_id: MethodId) -> bool {
        method_id != DENIED_METHOD
    }
}

async fn start_binding(path: &std::path::Path) -> (AraComIpcBinding, Arc<EchoBackend>, IpcUnicastAddress) {
    let binding = AraComIpcBinding::with_access_control(Config::default(), Arc::new(DenyOneMethod)).unwrap();
    let address = IpcUnicastAddress { domain: 0, port: 1 };
    let acceptor = Arc::new(UnixDomainSocketAcceptor::new(path));
    let backend = Arc::new(EchoBackend::new());
    binding
        .offer_service_instance(address, acceptor, instance_id(), Arc::clone(&backend) as Arc<dyn SkeletonBackendRouterInterface>)
        .await
        .unwrap();
    (binding, backend, address)
}

#[tokio::test]
async fn simple_request_gets_a_matching_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simple-request.sock");
    let (binding, backend, address) = start_binding(&path).await;

    let mut client = UnixStream::connect(&path).await.unwrap();
    let request = IpcPacket::new(VariantHeader::Request(method_header(ALLOWED_METHOD, 1)), ReturnCode::Ok, vec![1, 2, 3, 4]);
    send_packet(&mut client, &request).await;

    let response = recv_packet(&mut client).await;
    match response.variant {
        VariantHeader::Response(header) => {
            assert_eq!(header.method_id, ALLOWED_METHOD);
            assert_eq!(response.get_packet(), &[1, 2, 3, 4]);
        }
        other => panic!("expected Response, got {other:?}"),
    }
    assert_eq!(backend.requests_seen.load(Ordering::SeqCst), 1);

    binding.shutdown(address).await;
}

#[tokio::test]
async fn denied_method_gets_an_error_response_and_never_reaches_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("denied-request.sock");
    let (binding, backend, address) = start_binding(&path).await;

    let mut client = UnixStream::connect(&path).await.unwrap();
    let request = IpcPacket::new(VariantHeader::Request(method_header(DENIED_METHOD, 1)), ReturnCode::Ok, vec![9]);
    send_packet(&mut client, &request).await;

    let response = recv_packet(&mut client).await;
    match response.variant {
        VariantHeader::ErrorResponse(header) => {
            assert_eq!(header.method_id, DENIED_METHOD);
            assert_eq!(response.header.return_code, ReturnCode::NotOk);
        }
        other => panic!("expected ErrorResponse, got {other:?}"),
    }
    assert_eq!(backend.requests_seen.load(Ordering::SeqCst), 0);

    binding.shutdown(address).await;
}

#[tokio::test]
async fn subscribe_then_disconnect_acks_and_scrubs_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscribe-disconnect.sock");
    let (binding, backend, address) = start_binding(&path).await;

    let mut client = UnixStream::connect(&path).await.unwrap();
    send_packet(&mut client, &IpcPacket::new(VariantHeader::SubscribeEvent(event_header()), ReturnCode::Ok, Vec::new())).await;

    let ack = recv_packet(&mut client).await;
    assert!(matches!(ack.variant, VariantHeader::SubscribeEventAck(_)));

    drop(client);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(backend.disconnects_seen.load(Ordering::SeqCst), 1);

    binding.shutdown(address).await;
}

#[tokio::test]
async fn requests_for_an_unoffered_instance_get_an_error_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unoffered-instance.sock");
    let (binding, _backend, address) = start_binding(&path).await;

    let mut client = UnixStream::connect(&path).await.unwrap();
    let mut header = method_header(ALLOWED_METHOD, 1);
    header.instance_id = 0xFFFF;
    send_packet(&mut client, &IpcPacket::new(VariantHeader::Request(header), ReturnCode::Ok, Vec::new())).await;

    let response = recv_packet(&mut client).await;
    assert!(matches!(response.variant, VariantHeader::ErrorResponse(_)));

    binding.shutdown(address).await;
}
