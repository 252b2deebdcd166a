//! # ara::com IPC Binding Core
//!
//! The ECU-internal transport binding for an AUTOSAR Adaptive `ara::com`
//! SOME/IP middleware: connection lifecycle and framing, the skeleton-side
//! packet router, SOME/IP-TP reassembly, and the reactor/application-thread
//! synchronization primitive that ties them together. See `SPEC_FULL.md`
//! for the full requirements this crate implements and `DESIGN.md` for the
//! grounding behind each module.

pub mod access_control;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod reactor;
pub mod reactor_sync_task;
pub mod router;
pub mod sd_options;
pub mod someip_tp;
pub mod trace;

pub use config::Config;
pub use error::{IpcCoreError, Result};
pub use lifecycle::AraComIpcBinding;
pub use message::IpcPacket;
pub use reactor::Reactor;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
