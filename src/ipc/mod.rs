//! # Transport Abstraction
//!
//! The transport endpoint and its acceptor are external collaborators
//! (components C1/C2 in the design): an opaque, connection-oriented
//! byte-stream with length-delimited messages, asynchronous send/receive
//! completions, and a peer-credentials query. The core (everything in
//! `crate::connection`, `crate::router`, `crate::someip_tp`) only ever talks
//! to the `TransportEndpoint`/`Acceptor` traits below; it never downcasts to
//! a concrete transport (design §9: "Virtual dispatch over transport and
//! acceptor... replace with a trait/interface parameter").
//!
//! `unix_domain_socket` is the one concrete transport this crate ships,
//! used by the demo binary and the integration tests. Its length-prefix
//! framing is carried over from this crate's benchmark-suite lineage
//! (`read_message`/`write_message` in the original `unix_domain_socket.rs`).

pub mod unix_domain_socket;

use async_trait::async_trait;
use std::fmt;

pub use unix_domain_socket::{UnixDomainSocketAcceptor, UnixDomainSocketEndpoint};

/// Opaque peer identity obtained after accept. In the absence of OS-level
/// credential support every peer is treated as `0` (baseline/QM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredentials(pub u64);

/// Errors a transport's `send` can report, matching the design's
/// `SendSafeIpc` error enumeration (§6).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not initialized")]
    Uninitialized,
    #[error("transport busy: a send is already in flight")]
    Busy,
    #[error("message exceeds the transport's maximum message size")]
    Size,
    #[error("peer disconnected (orderly={orderly})")]
    Disconnected { orderly: bool },
    #[error("transport resource exhausted")]
    Resource,
    #[error("transport-level protocol error: {0}")]
    ProtocolError(String),
}

/// A connection-oriented, length-delimited byte stream. `send` and
/// `receive` each represent one in-flight operation; the core serializes
/// sends itself (see `crate::connection::message_handler`) so a transport
/// implementation does not need to queue internally.
#[async_trait]
pub trait TransportEndpoint: Send + Sync {
    /// Sends exactly one length-delimited message. Resolves once the bytes
    /// have been handed to the OS (there is no separate "AsyncPending" case
    /// to model in Rust: the `await` point *is* the suspension).
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Waits for and returns the next complete message. The returned
    /// buffer's length is always exactly the advertised message length
    /// (invariant I5 holds by construction in every implementation here).
    async fn receive(&self) -> Result<Vec<u8>, TransportError>;

    fn peer_credentials(&self) -> PeerCredentials;

    /// In the absence of OS-level integrity levels every peer is QM; a real
    /// transport backed by SELinux/MAC labels would check here.
    fn check_peer_integrity_level(&self, _level: crate::config::IntegrityLevel) -> bool {
        true
    }

    async fn close(&self);

    fn is_in_use(&self) -> bool;
}

/// A listening endpoint that accepts connections one at a time.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn init(&self) -> Result<(), TransportError>;

    /// Accepts the next connection. Only one `accept` is ever pending at a
    /// time per the design's external acceptor contract.
    async fn accept(&self) -> Result<Box<dyn TransportEndpoint>, TransportError>;

    async fn close(&self);

    fn is_in_use(&self) -> bool;
}

impl fmt::Display for PeerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}
