//! # Unix Domain Socket Transport
//!
//! A concrete `TransportEndpoint`/`Acceptor` pair over `tokio::net::UnixStream`.
//! Framing is a 4-byte little-endian length prefix followed by exactly that
//! many bytes, the same scheme this crate's lineage used in
//! `read_message`/`write_message`, with the same 16 MiB guard against a
//! corrupt or hostile length prefix driving an unbounded allocation.

use super::{Acceptor, PeerCredentials, TransportEndpoint, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

async fn write_message(write_half: &mut OwnedWriteHalf, payload: &[u8]) -> Result<(), TransportError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::Size);
    }
    let len = payload.len() as u32;
    write_half
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|err| disconnect_or_resource(&err))?;
    write_half
        .write_all(payload)
        .await
        .map_err(|err| disconnect_or_resource(&err))?;
    Ok(())
}

async fn read_message(read_half: &mut OwnedReadHalf) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    read_half
        .read_exact(&mut len_buf)
        .await
        .map_err(|err| disconnect_or_resource(&err))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(TransportError::Size);
    }
    // Allocated buffer capacity is exactly the advertised length (invariant I5).
    let mut buf = vec![0u8; len];
    read_half
        .read_exact(&mut buf)
        .await
        .map_err(|err| disconnect_or_resource(&err))?;
    Ok(buf)
}

fn disconnect_or_resource(err: &std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            TransportError::Disconnected { orderly: err.kind() == ErrorKind::UnexpectedEof }
        }
        _ => TransportError::Resource,
    }
}

/// Reads the connecting peer's credentials via `SO_PEERCRED` on Linux.
/// Platforms without that facility fall back to the baseline identity `0`.
#[cfg(target_os = "linux")]
fn peer_credentials_of(stream: &UnixStream) -> PeerCredentials {
    match nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => PeerCredentials(cred.pid() as u64),
        Err(_) => PeerCredentials(0),
    }
}

#[cfg(not(target_os = "linux"))]
fn peer_credentials_of(_stream: &UnixStream) -> PeerCredentials {
    PeerCredentials(0)
}

/// One accepted (or connected) Unix domain socket, split into independently
/// lockable read/write halves so `send` and `receive` never contend with
/// each other.
pub struct UnixDomainSocketEndpoint {
    write_half: AsyncMutex<OwnedWriteHalf>,
    read_half: AsyncMutex<OwnedReadHalf>,
    peer_credentials: PeerCredentials,
    in_use: AtomicBool,
}

impl UnixDomainSocketEndpoint {
    pub fn new(stream: UnixStream) -> Self {
        let peer_credentials = peer_credentials_of(&stream);
        let (read_half, write_half) = stream.into_split();
        Self {
            write_half: AsyncMutex::new(write_half),
            read_half: AsyncMutex::new(read_half),
            peer_credentials,
            in_use: AtomicBool::new(false),
        }
    }

    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl TransportEndpoint for UnixDomainSocketEndpoint {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.in_use.store(true, Ordering::SeqCst);
        let mut write_half = self.write_half.lock().await;
        let result = write_message(&mut write_half, payload).await;
        self.in_use.store(false, Ordering::SeqCst);
        result
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        self.in_use.store(true, Ordering::SeqCst);
        let mut read_half = self.read_half.lock().await;
        let result = read_message(&mut read_half).await;
        self.in_use.store(false, Ordering::SeqCst);
        result
    }

    fn peer_credentials(&self) -> PeerCredentials {
        self.peer_credentials
    }

    async fn close(&self) {
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
    }

    fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

/// Listening endpoint for one local address. Removes a stale socket file
/// before binding and unlinks it again on close, mirroring this crate's
/// prior `UnixDomainSocketTransport::start_server`/`cleanup_socket`.
pub struct UnixDomainSocketAcceptor {
    path: PathBuf,
    listener: AsyncMutex<Option<UnixListener>>,
    in_use: AtomicBool,
}

impl UnixDomainSocketAcceptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            listener: AsyncMutex::new(None),
            in_use: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Acceptor for UnixDomainSocketAcceptor {
    async fn init(&self) -> Result<(), TransportError> {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
        let listener = UnixListener::bind(&self.path).map_err(|_| TransportError::Resource)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&self.path) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o666);
                let _ = std::fs::set_permissions(&self.path, perms);
            }
        }
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn accept(&self) -> Result<Box<dyn TransportEndpoint>, TransportError> {
        self.in_use.store(true, Ordering::SeqCst);
        let guard = self.listener.lock().await;
        let listener = guard.as_ref().ok_or(TransportError::Uninitialized)?;
        let (stream, _addr) = listener.accept().await.map_err(|_| TransportError::Resource)?;
        self.in_use.store(false, Ordering::SeqCst);
        Ok(Box::new(UnixDomainSocketEndpoint::new(stream)))
    }

    async fn close(&self) {
        self.listener.lock().await.take();
        let _ = std::fs::remove_file(&self.path);
    }

    fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl Drop for UnixDomainSocketAcceptor {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_round_trips_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uds-test.sock");

        let acceptor = UnixDomainSocketAcceptor::new(&path);
        acceptor.init().await.unwrap();

        let accept_task = {
            let acceptor = &acceptor;
            async move { acceptor.accept().await.unwrap() }
        };
        let connect_task = UnixDomainSocketEndpoint::connect(&path);

        let (server_endpoint, client_endpoint) = tokio::join!(accept_task, connect_task);
        let client_endpoint = client_endpoint.unwrap();

        client_endpoint.send(b"hello").await.unwrap();
        let received = server_endpoint.receive().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_at_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uds-test-big.sock");
        let acceptor = UnixDomainSocketAcceptor::new(&path);
        acceptor.init().await.unwrap();

        let accept_task = async { acceptor.accept().await.unwrap() };
        let connect_task = UnixDomainSocketEndpoint::connect(&path);
        let (_server, client) = tokio::join!(accept_task, connect_task);
        let client = client.unwrap();

        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let result = client.send(&oversized).await;
        assert!(matches!(result, Err(TransportError::Size)));
    }
}
