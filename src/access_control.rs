//! # Access control
//!
//! The incoming-request gate `ConnectionSkeleton` consults before handing a
//! `Request`/`RequestNoReturn` to its backend router, mirroring the
//! credential check `connection_skeleton.h` runs against the peer before
//! dispatch. The policy itself — MAC labels, an ACL file, whatever a
//! deployment uses — is an external collaborator; this crate only defines
//! the seam and the default allow-everything policy a binding gets if it
//! never installs one.

use crate::ipc::PeerCredentials;
use crate::message::{MethodId, ServiceInstanceIdentifier};

/// Decides whether `peer` may invoke `method_id` on `service_instance`.
/// Consulted once per incoming `Request`/`RequestNoReturn`, never for
/// subscribe/unsubscribe (the design scopes access control to method calls).
pub trait AccessControl: Send + Sync {
    fn check_method_request(&self, peer: PeerCredentials, service_instance: ServiceInstanceIdentifier, method_id: MethodId) -> bool;
}

/// The default policy: every peer may call every method. Installed
/// automatically when a binding never configures its own.
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn check_method_request(&self, _peer: PeerCredentials, _service_instance: ServiceInstanceIdentifier, _method_id: MethodId) -> bool {
        true
    }
}
