//! # IPC Wire Data Model
//!
//! The eight IPC message variants, their common [`GenericMessageHeader`], and
//! the identifier types that compose a [`ServiceInstanceIdentifier`]. A
//! message is represented as a header plus a reference-counted, immutable
//! payload buffer (`Arc<[u8]>`) so the same bytes can be simultaneously
//! queued for send and held by a [`crate::trace::TraceMonitor`] sink.
//!
//! All integers are encoded in the host's native byte order via `bincode`;
//! per §6 of the design there is no network-byte-order requirement at this
//! layer (this is an intra-host binding, not a wire protocol to another
//! machine).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 16-bit service identifier.
pub type ServiceId = u16;
/// 16-bit instance identifier.
pub type InstanceId = u16;
/// 8-bit major version.
pub type MajorVersion = u8;
/// 32-bit minor version.
pub type MinorVersion = u32;
/// 16-bit method or event identifier.
pub type MethodId = u16;
pub type EventId = u16;
/// 16-bit client identifier.
pub type ClientId = u16;
/// 16-bit session identifier.
pub type SessionId = u16;
/// Process-wide unique connection identifier.
pub type ConnectionId = u32;

/// `(ServiceId, InstanceId, MajorVersion, MinorVersion)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstanceIdentifier {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: MajorVersion,
    pub minor_version: MinorVersion,
}

/// Whether a provided instance was generated (a fixed instance id) or
/// registered against the any-instance wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceProvenance {
    Generated,
    AnyInstanceWildcard,
}

/// A `ServiceInstanceIdentifier` plus its provenance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvidedServiceInstanceId {
    pub service_instance: ServiceInstanceIdentifier,
    pub provenance: InstanceProvenance,
}

/// A logical local endpoint. Not a network address — a domain/port pair
/// meaningful only to the local transport's acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpcUnicastAddress {
    pub domain: u32,
    pub port: u32,
}

/// Return code carried by `ErrorResponse` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    NotOk,
}

/// Discriminates the eight IPC message variants. The TP sublayer sets a bit
/// alongside this value on the wire; in this model that bit is carried
/// out-of-band by [`super::someip_tp`] rather than folded into this enum, so
/// `MessageType` here is always "the type with the TP bit already stripped",
/// matching the assembler-mapping key in §3 of the design
/// (`MessageType∖TP-flag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    RequestNoReturn,
    Response,
    ErrorResponse,
    ApplicationError,
    Notification,
    SubscribeEvent,
    SubscribeEventAck,
    SubscribeEventNAck,
    UnsubscribeEvent,
}

/// Header fields common to every variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenericMessageHeader {
    pub protocol_version: u8,
    pub message_type: MessageType,
    pub return_code: ReturnCode,
    pub payload_length: u32,
}

/// Fields shared by Request/RequestNoReturn/Response/ErrorResponse/ApplicationError.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MethodHeader {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: MajorVersion,
    pub method_id: MethodId,
    pub client_id: ClientId,
    pub session_id: SessionId,
}

/// Fields shared by Notification and the Subscribe/Unsubscribe family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventHeader {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: MajorVersion,
    pub event_id: EventId,
    pub client_id: ClientId,
}

/// The application-level user error payload carried by `ApplicationError`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApplicationErrorCode {
    pub error_code: u32,
    pub error_domain: u32,
}

/// A type-specific header, tagged by variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum VariantHeader {
    Request(MethodHeader),
    RequestNoReturn(MethodHeader),
    Response(MethodHeader),
    ErrorResponse(MethodHeader),
    ApplicationError(MethodHeader, ApplicationErrorCode),
    Notification(EventHeader, SessionId),
    SubscribeEvent(EventHeader),
    SubscribeEventAck(EventHeader),
    SubscribeEventNAck(EventHeader),
    UnsubscribeEvent(EventHeader),
}

/// An immutable, reference-counted payload. Cloning an `IpcPacket` is cheap;
/// the bytes are shared, not copied, so a packet may be queued for send and
/// handed to a trace sink at the same time.
pub type PayloadBuffer = Arc<[u8]>;

/// A complete IPC message: a generic header, a variant-specific header, and
/// a shared payload buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcPacket {
    pub header: GenericMessageHeader,
    pub variant: VariantHeader,
    #[serde(with = "payload_serde")]
    pub payload: PayloadBuffer,
}

impl IpcPacket {
    pub fn new(variant: VariantHeader, return_code: ReturnCode, payload: Vec<u8>) -> Self {
        let message_type = variant_message_type(&variant);
        let header = GenericMessageHeader {
            protocol_version: 1,
            message_type,
            return_code,
            payload_length: payload.len() as u32,
        };
        Self {
            header,
            variant,
            payload: Arc::from(payload.into_boxed_slice()),
        }
    }

    /// A const view of the payload, matching the original `GetPacket()`
    /// accessor.
    pub fn get_packet(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn variant_message_type(variant: &VariantHeader) -> MessageType {
    match variant {
        VariantHeader::Request(_) => MessageType::Request,
        VariantHeader::RequestNoReturn(_) => MessageType::RequestNoReturn,
        VariantHeader::Response(_) => MessageType::Response,
        VariantHeader::ErrorResponse(_) => MessageType::ErrorResponse,
        VariantHeader::ApplicationError(..) => MessageType::ApplicationError,
        VariantHeader::Notification(..) => MessageType::Notification,
        VariantHeader::SubscribeEvent(_) => MessageType::SubscribeEvent,
        VariantHeader::SubscribeEventAck(_) => MessageType::SubscribeEventAck,
        VariantHeader::SubscribeEventNAck(_) => MessageType::SubscribeEventNAck,
        VariantHeader::UnsubscribeEvent(_) => MessageType::UnsubscribeEvent,
    }
}

/// `Arc<[u8]>` has no native serde impl; bridge through `Vec<u8>` at the
/// serialization boundary only.
mod payload_serde {
    use super::PayloadBuffer;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(value: &PayloadBuffer, ser: S) -> Result<S::Ok, S::Error> {
        value.as_ref().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<PayloadBuffer, D::Error> {
        let bytes = Vec::<u8>::deserialize(de)?;
        Ok(Arc::from(bytes.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_request() {
        let header = MethodHeader {
            service_id: 0x1234,
            instance_id: 0x0001,
            major_version: 1,
            method_id: 0x0100,
            client_id: 0x0010,
            session_id: 0x0001,
        };
        let packet = IpcPacket::new(
            VariantHeader::Request(header),
            ReturnCode::Ok,
            vec![0xAA, 0xBB],
        );
        let bytes = packet.to_bytes().unwrap();
        let decoded = IpcPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.header.message_type, MessageType::Request);
        assert_eq!(decoded.get_packet(), &[0xAA, 0xBB]);
    }

    #[test]
    fn round_trip_all_variants_preserve_type() {
        let method = MethodHeader {
            service_id: 1,
            instance_id: 1,
            major_version: 1,
            method_id: 1,
            client_id: 1,
            session_id: 1,
        };
        let event = EventHeader {
            service_id: 1,
            instance_id: 1,
            major_version: 1,
            event_id: 1,
            client_id: 1,
        };
        let variants = vec![
            VariantHeader::Request(method),
            VariantHeader::RequestNoReturn(method),
            VariantHeader::Response(method),
            VariantHeader::ErrorResponse(method),
            VariantHeader::ApplicationError(method, ApplicationErrorCode { error_code: 1, error_domain: 1 }),
            VariantHeader::Notification(event, 1),
            VariantHeader::SubscribeEvent(event),
            VariantHeader::SubscribeEventAck(event),
            VariantHeader::SubscribeEventNAck(event),
            VariantHeader::UnsubscribeEvent(event),
        ];
        for variant in variants {
            let expected = variant_message_type(&variant);
            let packet = IpcPacket::new(variant, ReturnCode::Ok, vec![]);
            let decoded = IpcPacket::from_bytes(&packet.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded.header.message_type, expected);
        }
    }
}
