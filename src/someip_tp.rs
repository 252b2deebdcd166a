//! # SOME/IP-TP Reassembly Engine
//!
//! Per-flow reassembly of segmented SOME/IP messages (component C11). Each
//! TP segment carries the base header with the TP bit set in its message
//! type, followed by a 32-bit `TpHeader`: `offset` (bits 31..4, in units of
//! 16 bytes), `reserved` (bits 3..1), and `more_segments_flag` (bit 0).
//!
//! Two allocation policies coexist at runtime (design §9: "Assemblers carry
//! an allocator handle rather than a template parameter"): `Deterministic`
//! assemblers carve a fixed-size slice out of one process-wide monotonic
//! arena and never fall back to the heap — exhaustion is a typed error, not
//! undefined behavior; `Flexible` assemblers grow an ordinary `Vec<u8>`.

use crate::error::{IpcCoreError, Result};
use crate::message::{ClientId, InstanceId, MajorVersion, MessageType, MethodId, ServiceId};
use std::net::IpAddr;

/// `[offset:28 | reserved:3 | more:1]`, offset in units of 16 bytes.
#[derive(Debug, Clone, Copy)]
pub struct TpHeader {
    pub offset_bytes: u32,
    pub more_segments: bool,
}

impl TpHeader {
    pub fn decode(word: u32) -> Self {
        let offset_units = word >> 4;
        let more_segments = word & 0x1 != 0;
        Self {
            offset_bytes: offset_units * 16,
            more_segments,
        }
    }

    pub fn encode(&self) -> u32 {
        ((self.offset_bytes / 16) << 4) | (self.more_segments as u32)
    }
}

/// A fixed-size backing store carved up in allocation order and never
/// reclaimed — the "deterministic" TP allocator. Exhaustion is reported to
/// the caller, never aborts (design §7: "Allocation... failure of the
/// deterministic monotonic buffer -> return error to the caller").
pub struct MonotonicArena {
    total_size: usize,
    used: usize,
}

impl MonotonicArena {
    pub fn new(total_size: usize) -> Self {
        Self { total_size, used: 0 }
    }

    pub fn try_allocate(&mut self, size: usize) -> Result<()> {
        if self.used + size > self.total_size {
            return Err(IpcCoreError::Allocation {
                requested: size,
                remaining: self.total_size.saturating_sub(self.used),
            });
        }
        self.used += size;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.total_size - self.used
    }
}

/// Which backing store a given assembler was created with, chosen once at
/// creation time per the AssemblerMapping's configuration lookup.
enum Allocation {
    Flexible,
    Deterministic,
}

/// Per-flow reassembly state for one in-flight (or completed) TP message.
pub struct Assembler {
    buffer: Vec<u8>,
    max_size: usize,
    received_ranges: Vec<(u32, u32)>,
    closed: bool,
    allocation: Allocation,
}

/// Result of feeding one segment to an [`Assembler`].
pub enum SegmentOutcome {
    /// More segments are expected.
    Partial,
    /// The message is complete; `payload` has the TP bit cleared.
    Complete { payload: Vec<u8> },
    /// The segment violated the max-size bound or alignment rule and the
    /// partial (if any) was canceled.
    Dropped,
}

impl Assembler {
    fn new(max_size: usize, allocation: Allocation) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
            received_ranges: Vec::new(),
            closed: false,
            allocation,
        }
    }

    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.received_ranges.clear();
        self.closed = true;
    }

    /// Implements the acceptance algorithm of design §4.5.
    pub fn accept_segment(
        &mut self,
        arena: &mut MonotonicArena,
        offset_bytes: u32,
        payload: &[u8],
        more: bool,
    ) -> Result<SegmentOutcome> {
        if self.closed {
            return Ok(SegmentOutcome::Dropped);
        }

        let end = offset_bytes as usize + payload.len();
        if end > self.max_size {
            self.cancel();
            return Ok(SegmentOutcome::Dropped);
        }

        // Intermediate segments (more == true) must be 16-byte aligned both
        // in offset and length; only the final segment may be short.
        if more && (offset_bytes % 16 != 0 || payload.len() % 16 != 0) {
            self.cancel();
            return Ok(SegmentOutcome::Dropped);
        }

        if matches!(self.allocation, Allocation::Deterministic) && self.buffer.is_empty() {
            arena.try_allocate(self.max_size)?;
        }

        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset_bytes as usize..end].copy_from_slice(payload);
        self.received_ranges.push((offset_bytes, end as u32));

        if !more {
            self.closed = true;
            let total = end;
            if !covers_contiguous(&self.received_ranges, total as u32) {
                self.cancel();
                return Ok(SegmentOutcome::Dropped);
            }
            return Ok(SegmentOutcome::Complete {
                payload: self.buffer[..total].to_vec(),
            });
        }

        Ok(SegmentOutcome::Partial)
    }
}

/// Verifies the received segment ranges form a contiguous `[0, total)`
/// cover, the I-TP-monotonic property.
fn covers_contiguous(ranges: &[(u32, u32)], total: u32) -> bool {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|(start, _)| *start);
    let mut cursor = 0u32;
    for (start, end) in sorted {
        if start > cursor {
            return false;
        }
        cursor = cursor.max(end);
    }
    cursor >= total
}

/// `(ServiceId, MajorVersion, MethodId, MessageType) -> (max_message_size, deterministic?)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConfigKey {
    service_id: ServiceId,
    major_version: MajorVersion,
    method_id: MethodId,
    message_type: MessageType,
}

/// `(InstanceId, ServiceId, MethodId, ClientId, InterfaceVersion, MessageType∖TP-flag, PeerIpAddress, PeerPort)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub instance_id: InstanceId,
    pub service_id: ServiceId,
    pub method_id: MethodId,
    pub client_id: ClientId,
    pub major_version: MajorVersion,
    pub message_type: MessageType,
    pub peer_addr: IpAddr,
    pub peer_port: u16,
}

/// Per-flow table mapping a [`FlowKey`] to its [`Assembler`], plus the
/// configuration that says which keys are even eligible for reassembly.
///
/// The original implementation uses a linear-scan `Vec<(Key, Assembler)>`
/// rather than a hash map — flow tables at this scale are small and bounded
/// by configuration, so this is carried over rather than switched to a
/// `HashMap` for no behavioral gain.
pub struct AssemblerMapping {
    lookup_table: Vec<(ConfigKey, (usize, bool))>,
    assemblers: Vec<(FlowKey, Assembler)>,
    arena: MonotonicArena,
}

impl AssemblerMapping {
    pub fn new(lookup_table: &[crate::config::TpLookupEntry], monotonic_buffer_size: usize) -> Self {
        let lookup_table = lookup_table
            .iter()
            .map(|entry| {
                (
                    ConfigKey {
                        service_id: entry.service_id,
                        major_version: entry.major_version,
                        method_id: entry.method_id,
                        message_type: entry.message_type,
                    },
                    (entry.max_message_size, entry.deterministic),
                )
            })
            .collect();
        Self {
            lookup_table,
            assemblers: Vec::new(),
            arena: MonotonicArena::new(monotonic_buffer_size),
        }
    }

    fn find_index(&self, key: &FlowKey) -> Option<usize> {
        self.assemblers.iter().position(|(k, _)| k == key)
    }

    /// Looks up (and optionally creates) the assembler for `key`. Returns
    /// `None` if the key is not eligible for reassembly under the
    /// configured lookup table — the caller is expected to reject or pass
    /// through such messages rather than treating it as abort-worthy.
    fn find_or_create(&mut self, key: FlowKey, create: bool) -> Option<usize> {
        if let Some(idx) = self.find_index(&key) {
            return Some(idx);
        }
        if !create {
            return None;
        }
        let config_key = ConfigKey {
            service_id: key.service_id,
            major_version: key.major_version,
            method_id: key.method_id,
            message_type: key.message_type,
        };
        let (max_size, deterministic) = self
            .lookup_table
            .iter()
            .find(|(k, _)| *k == config_key)
            .map(|(_, v)| *v)?;
        let allocation = if deterministic { Allocation::Deterministic } else { Allocation::Flexible };
        self.assemblers.push((key, Assembler::new(max_size, allocation)));
        Some(self.assemblers.len() - 1)
    }

    /// `true` iff `is_tp` is set. As a side effect, if `is_tp` is false and
    /// a partial assembler exists for this key, that partial is canceled
    /// (invariant I6 / I-TP-cancel-on-nontp): a fresh non-segmented message
    /// of the same logical identity invalidates any in-progress reassembly.
    pub fn requires_assembly(&mut self, key: FlowKey, is_tp: bool) -> bool {
        if !is_tp {
            if let Some(idx) = self.find_or_create(key, false) {
                self.assemblers[idx].1.cancel();
            }
            return false;
        }
        true
    }

    /// Feeds one TP segment through the assembler for `key`, creating it on
    /// first use if the key is configured. `Ok(None)` means the key is not
    /// configured for reassembly (message dropped, logged by the caller).
    pub fn feed_segment(
        &mut self,
        key: FlowKey,
        tp_header: TpHeader,
        payload: &[u8],
    ) -> Result<Option<SegmentOutcome>> {
        let Some(idx) = self.find_or_create(key, true) else {
            return Ok(None);
        };
        let (_, assembler) = &mut self.assemblers[idx];
        let outcome = assembler.accept_segment(&mut self.arena, tp_header.offset_bytes, payload, tp_header.more_segments)?;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TpLookupEntry;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey {
            instance_id: 1,
            service_id: 0x1234,
            method_id: 0x0100,
            client_id: 1,
            major_version: 1,
            message_type: MessageType::Request,
            peer_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            peer_port: 30509,
        }
    }

    fn mapping(deterministic: bool) -> AssemblerMapping {
        let table = vec![TpLookupEntry {
            service_id: 0x1234,
            major_version: 1,
            method_id: 0x0100,
            message_type: MessageType::Request,
            max_message_size: 4096,
            deterministic,
        }];
        AssemblerMapping::new(&table, 1 << 16)
    }

    #[test]
    fn reassembles_contiguous_segments_in_order() {
        let mut mapping = mapping(false);
        let segments: &[(u32, usize, bool)] = &[(0, 1024, true), (1024, 1024, true), (2048, 1024, true), (3072, 100, false)];
        let mut last = None;
        for (offset, len, more) in segments {
            let payload = vec![0xAB; *len];
            let outcome = mapping
                .feed_segment(key(), TpHeader { offset_bytes: *offset, more_segments: *more }, &payload)
                .unwrap()
                .unwrap();
            last = Some(outcome);
        }
        match last.unwrap() {
            SegmentOutcome::Complete { payload } => assert_eq!(payload.len(), 3172),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn non_tp_message_cancels_existing_partial() {
        let mut mapping = mapping(false);
        mapping
            .feed_segment(key(), TpHeader { offset_bytes: 0, more_segments: true }, &vec![0u8; 1024])
            .unwrap();
        assert!(mapping.find_index(&key()).is_some());
        let requires = mapping.requires_assembly(key(), false);
        assert!(!requires);
        let (_, assembler) = &mapping.assemblers[mapping.find_index(&key()).unwrap()];
        assert!(assembler.closed);
        assert!(assembler.buffer.is_empty());
    }

    #[test]
    fn deterministic_allocator_exhaustion_is_a_typed_error_not_abort() {
        let table = vec![TpLookupEntry {
            service_id: 0x1234,
            major_version: 1,
            method_id: 0x0100,
            message_type: MessageType::Request,
            max_message_size: 4096,
            deterministic: true,
        }];
        let mut mapping = AssemblerMapping::new(&table, 4096);
        mapping
            .feed_segment(key(), TpHeader { offset_bytes: 0, more_segments: true }, &vec![0u8; 1024])
            .unwrap();
        // A second distinct flow, still deterministic, should exhaust the 4096-byte arena.
        let mut other_key = key();
        other_key.client_id = 2;
        let result = mapping.feed_segment(other_key, TpHeader { offset_bytes: 0, more_segments: true }, &vec![0u8; 1024]);
        assert!(matches!(result, Err(IpcCoreError::Allocation { .. })));
    }

    #[test]
    fn unconfigured_key_is_rejected_without_creating_an_assembler() {
        let mut mapping = mapping(false);
        let mut other_key = key();
        other_key.method_id = 0xFFFF;
        let outcome = mapping
            .feed_segment(other_key, TpHeader { offset_bytes: 0, more_segments: false }, &[1, 2, 3])
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn oversized_segment_is_dropped_and_cancels_partial() {
        let mut mapping = mapping(false);
        mapping
            .feed_segment(key(), TpHeader { offset_bytes: 0, more_segments: true }, &vec![0u8; 1024])
            .unwrap();
        let outcome = mapping
            .feed_segment(key(), TpHeader { offset_bytes: 4000, more_segments: false }, &vec![0u8; 200])
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, SegmentOutcome::Dropped));
    }
}
