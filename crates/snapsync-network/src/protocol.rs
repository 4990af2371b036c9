//! Wire protocol of the peer exchange
//!
//! Every frame carries one bincode-encoded [`ProtocolMessage`]. The envelope
//! holds a version so that payload formats can evolve; peers with a
//! different major version are refused.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snapsync_types::{Error, ErrorKind, Result};
use std::fmt;

/// Largest frame either side accepts
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Patch version
    pub patch: u16,
}

impl ProtocolVersion {
    /// Create a new protocol version
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Current protocol version
    pub const fn current() -> Self {
        Self::new(1, 0, 0)
    }

    /// Check if this version can talk to another version
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Protocol message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Peer identification, answered with the responder's own
    Handshake,
    /// Caller's inventory, payload [`InventoryRequest`]
    InventoryExchange,
    /// Answer to an inventory exchange, payload [`Reconciliation`](snapsync_types::Reconciliation)
    Reconciliation,
    /// Announcement of an inbound snapshot, payload [`ReceiveSnapshot`]
    ReceiveSnapshot,
    /// Answer to an announcement, payload [`ReceiveAck`]
    ReceiveAck,
    /// Keepalive, echoed back
    Heartbeat,
    /// Failure of a request, payload [`ErrorPayload`]
    Error,
}

/// Protocol message structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Message type
    pub message_type: MessageType,
    /// Message ID for correlation
    pub message_id: uuid::Uuid,
    /// Protocol version
    pub version: ProtocolVersion,
    /// Message payload
    pub payload: Vec<u8>,
    /// Timestamp
    pub timestamp: u64,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::protocol(format!("Failed to encode: {}", e)))
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| Error::protocol(format!("Failed to decode: {}", e)))
}

impl ProtocolMessage {
    /// Create a new protocol message
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            message_id: uuid::Uuid::new_v4(),
            version: ProtocolVersion::current(),
            payload,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Create a message with an encoded payload
    pub fn with_payload<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        Ok(Self::new(message_type, encode(payload)?))
    }

    /// Create a reply that keeps this message's ID
    pub fn reply<T: Serialize>(&self, message_type: MessageType, payload: &T) -> Result<Self> {
        let mut reply = Self::with_payload(message_type, payload)?;
        reply.message_id = self.message_id;
        Ok(reply)
    }

    /// Create an error reply for `error`
    pub fn error_reply(&self, kind: ErrorKind, message: impl Into<String>) -> Result<Self> {
        self.reply(
            MessageType::Error,
            &ErrorPayload {
                kind,
                message: message.into(),
            },
        )
    }

    /// Rebuild the error carried by an error reply from `peer`
    pub fn to_remote_error(&self, peer: &str) -> Error {
        match self.decode_payload::<ErrorPayload>() {
            Ok(payload) => Error::from_remote(peer, payload.kind, payload.message),
            Err(e) => e,
        }
    }

    /// Decode the payload
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        decode(&self.payload)
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        decode(data)
    }
}

/// Handshake information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    /// Client/server identifier
    pub peer_id: String,
    /// Protocol version
    pub version: ProtocolVersion,
    /// Capabilities
    pub capabilities: Vec<String>,
}

impl HandshakeInfo {
    /// Create a new handshake info
    pub fn new<S: Into<String>>(peer_id: S) -> Self {
        Self {
            peer_id: peer_id.into(),
            version: ProtocolVersion::current(),
            capabilities: vec!["inventory".to_string(), "receive-announce".to_string()],
        }
    }
}

/// Caller's inventory sent for comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRequest {
    /// Snapshot names in the order the caller listed them
    pub inventory: Vec<String>,
}

/// Announcement of a snapshot the caller wants to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveSnapshot {
    /// Name of the snapshot
    pub name: String,
    /// Port the byte stream would be offered on
    pub port: u16,
}

/// Responder's answer to a [`ReceiveSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveAck {
    /// Whether the responder would accept the snapshot
    pub ready: bool,
    /// Where the snapshot would be received
    pub destination: Option<String>,
}

/// Failure reported by the responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Kind of the error on the responder
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapsync_types::Reconciliation;

    #[test]
    fn test_protocol_version_compatibility() {
        let v1_0_0 = ProtocolVersion::new(1, 0, 0);
        let v1_1_0 = ProtocolVersion::new(1, 1, 0);
        let v2_0_0 = ProtocolVersion::new(2, 0, 0);

        assert!(v1_0_0.is_compatible_with(&v1_1_0));
        assert!(v1_1_0.is_compatible_with(&v1_0_0));
        assert!(!v1_0_0.is_compatible_with(&v2_0_0));
        assert_eq!(v1_1_0.to_string(), "1.1.0");
    }

    #[test]
    fn test_reply_keeps_message_id() {
        let request = ProtocolMessage::with_payload(
            MessageType::InventoryExchange,
            &InventoryRequest {
                inventory: vec!["s1".to_string()],
            },
        )
        .unwrap();

        let reply = request
            .reply(
                MessageType::Reconciliation,
                &Reconciliation {
                    caller_missing: vec!["s3".to_string()],
                    peer_missing: vec!["s1".to_string()],
                },
            )
            .unwrap();

        assert_eq!(reply.message_id, request.message_id);
        let decoded: Reconciliation = reply.decode_payload().unwrap();
        assert_eq!(decoded.caller_missing, vec!["s3"]);
    }

    #[test]
    fn test_error_reply_carries_kind() {
        let request = ProtocolMessage::new(MessageType::InventoryExchange, Vec::new());
        let reply = request
            .error_reply(ErrorKind::ListFailed, "ERROR: can't access '/data'")
            .unwrap();

        let bytes = reply.to_bytes().unwrap();
        let parsed = ProtocolMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.message_type, MessageType::Error);

        let payload: ErrorPayload = parsed.decode_payload().unwrap();
        assert_eq!(payload.kind, ErrorKind::ListFailed);

        let error = parsed.to_remote_error("10.0.0.2:8000");
        assert!(matches!(error, Error::PeerListFailed { ref peer, .. } if peer == "10.0.0.2:8000"));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let error = ProtocolMessage::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_wrong_payload_type_is_protocol_error() {
        let message = ProtocolMessage::new(MessageType::ReceiveSnapshot, vec![1]);
        let error = message.decode_payload::<ReceiveSnapshot>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }
}
