//! # Configuration Surface
//!
//! Plain, programmatically-constructed configuration types. Parsing these
//! from JSON, TOML, or a CLI is explicitly out of scope for this crate (see
//! `SPEC_FULL.md` §1) — callers that want that can `serde_json::from_str`
//! a [`Config`] directly since it derives `Deserialize`. The demo binary
//! builds one in code.

use crate::message::{IpcUnicastAddress, MajorVersion, MethodId, ServiceId};
use serde::{Deserialize, Serialize};

/// Whether a [`crate::reactor_sync_task::ReactorSyncTask`] executes its
/// closure by acquiring a process-wide polling-mode lock on the calling
/// thread, or by scheduling it onto the reactor thread and blocking on a
/// condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeProcessingMode {
    Polling,
    ThreadDriven,
}

/// OS-supplied identity classification for a peer process. In the absence
/// of OS support every peer is treated as `Qm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegrityLevel {
    Qm,
    AsilB,
    AsilD,
}

/// The SOME/IP message type a TP lookup-table entry matches against, with
/// the TP bit already stripped (the assembler mapping keys are always
/// "what this message is once reassembled").
pub type TpMessageType = crate::message::MessageType;

/// One entry of the TP assembler configuration table:
/// `(ServiceId, MajorVersion, MethodId, MessageType) -> (max_message_size, deterministic?)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpLookupEntry {
    pub service_id: ServiceId,
    pub major_version: MajorVersion,
    pub method_id: MethodId,
    pub message_type: TpMessageType,
    pub max_message_size: usize,
    pub deterministic: bool,
}

/// Full configuration surface enumerated in design §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub processing_mode: RuntimeProcessingMode,
    /// TP assembler lookup table.
    pub tp_lookup_table: Vec<TpLookupEntry>,
    /// Total size, in bytes, of the monotonic buffer shared by every
    /// deterministic-policy assembler.
    pub tp_monotonic_buffer_size: usize,
    /// Per-offered-instance local address and integrity level.
    pub offered_instances: Vec<OfferedInstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferedInstanceConfig {
    pub address: IpcUnicastAddress,
    pub integrity_level: IntegrityLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing_mode: RuntimeProcessingMode::ThreadDriven,
            tp_lookup_table: Vec::new(),
            tp_monotonic_buffer_size: 1 << 20,
            offered_instances: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_has_no_instances() {
        let config = Config::default();
        assert!(config.offered_instances.is_empty());
        assert_eq!(config.processing_mode, RuntimeProcessingMode::ThreadDriven);
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = Config::default();
        config.tp_lookup_table.push(TpLookupEntry {
            service_id: 0x1234,
            major_version: 1,
            method_id: 0x0100,
            message_type: TpMessageType::Request,
            max_message_size: 4096,
            deterministic: false,
        });
        let json = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.tp_lookup_table.len(), 1);
    }
}
