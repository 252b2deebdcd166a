//! # Error Taxonomy
//!
//! The binding distinguishes recoverable, typed errors (propagated as
//! ordinary `Result` returns) from invariant violations and timeouts, which
//! are not recoverable and terminate the process rather than unwind through
//! callers that cannot have anticipated them.
//!
//! ## Kinds
//!
//! - [`IpcCoreError::Protocol`] — malformed wire data. The offending packet
//!   is discarded and the connection stays open.
//! - [`IpcCoreError::TransportFatal`] — the transport itself reported
//!   disconnection, size overflow, resource exhaustion, or a protocol error.
//!   The connection moves to the terminal `Error` send state.
//! - [`IpcCoreError::AccessDenied`] — access control rejected an incoming
//!   request; the caller replies with an `ErrorResponse`.
//! - [`IpcCoreError::Allocation`] — the deterministic TP allocator is
//!   exhausted. Returned to the caller, never aborts.
//!
//! [`abort_with_context`] covers the remaining two kinds from the design's
//! error taxonomy (`Configuration/invariant violation` and `Timeout`), which
//! have no typed `Result` variant because the contract is that they never
//! return.

use std::panic::Location;

/// Recoverable error taxonomy for the IPC binding core.
#[derive(Debug, thiserror::Error)]
pub enum IpcCoreError {
    /// Malformed header, length disagreement, bad TP offset, bad SD option
    /// framing. The packet is logged and discarded.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The transport reported a condition that cannot be recovered from on
    /// this connection: disconnection, size overflow, resource exhaustion,
    /// or a transport-level protocol error.
    #[error("transport fatal error: {0}")]
    TransportFatal(String),

    /// Access control denied an incoming request.
    #[error("access denied for peer {peer_credentials} on method {method_id:#06x}")]
    AccessDenied {
        peer_credentials: u64,
        method_id: u16,
    },

    /// A deterministic (monotonic-buffer) TP allocation could not be
    /// satisfied. This is surfaced to the caller so the configuration can be
    /// resized; it is never treated as process-fatal.
    #[error("deterministic TP allocator exhausted: requested {requested} of {remaining} bytes remaining")]
    Allocation { requested: usize, remaining: usize },

    /// The requested service instance has no registered backend router.
    #[error("no backend router registered for service instance {0:?}")]
    NoSuchServiceInstance(crate::message::ServiceInstanceIdentifier),

    /// A service instance is already offered (on this or another address).
    #[error("service instance {0:?} is already offered")]
    AlreadyOffered(crate::message::ProvidedServiceInstanceId),
}

pub type Result<T> = std::result::Result<T, IpcCoreError>;

/// Logs a structured violation record and aborts the process.
///
/// Used exactly where the design calls for "process abort with a structured
/// log message and location": double-registration of a backend router,
/// reactor software-event unregistration failure, a receive completion whose
/// size does not match the allocated buffer, and `ReactorSyncTask` timeout.
///
/// This function never returns; it is written to take `&str` rather than
/// `impl Display` so call sites stay grep-able.
#[track_caller]
pub fn abort_with_context(message: &str) -> ! {
    let location = Location::caller();
    tracing::error!(
        file = location.file(),
        line = location.line(),
        column = location.column(),
        "fatal invariant violation: {message}"
    );
    std::process::abort()
}
