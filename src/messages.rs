//! Wire model for discovery traffic.
//!
//! Messages travel as CBOR maps. Every string field is sealed by the
//! [`FieldCodec`](crate::crypto::FieldCodec) before it is placed here, so the
//! byte vectors below are always framed ciphertext.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Default UDP port discovery agents listen on.
pub const DISCOVERY_PORT: u16 = 6666;

/// Limited broadcast address requests are sent to.
pub const BROADCAST_IP: IpAddr = IpAddr::V4(Ipv4Addr::BROADCAST);

/// Zone label used by the token generator when none is configured.
pub const DEFAULT_ZONE_LABEL: &str = "GMT";

/// Receive deadline used by a cancellable listen loop when none is configured.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest datagram the listener will read.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Schema version stamped on every message.
pub const WIRE_VERSION: u8 = 1;

/// Discriminates the two message kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    /// Unicast reply carrying a service address and alias.
    Package,
    /// Broadcast asking peers to identify themselves.
    Request,
    /// Any kind this build does not know; always dropped.
    Unknown(u8),
}

impl MessageKind {
    pub const PACKAGE_CODE: u8 = 10;
    pub const REQUEST_CODE: u8 = 11;
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        match code {
            Self::PACKAGE_CODE => MessageKind::Package,
            Self::REQUEST_CODE => MessageKind::Request,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Package => MessageKind::PACKAGE_CODE,
            MessageKind::Request => MessageKind::REQUEST_CODE,
            MessageKind::Unknown(code) => code,
        }
    }
}

/// A discovery message as it travels between agents.
///
/// Which optional fields are present depends on `kind`: requests carry the
/// requester pair, packages carry the server pair and the alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub version: u8,
    pub kind: MessageKind,
    pub validation: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_ip: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_port: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Vec<u8>>,
}

impl DiscoveryMessage {
    pub fn request(validation: Vec<u8>, requester_ip: Vec<u8>, requester_port: Vec<u8>) -> Self {
        Self {
            version: WIRE_VERSION,
            kind: MessageKind::Request,
            validation,
            server_ip: None,
            server_port: None,
            requester_ip: Some(requester_ip),
            requester_port: Some(requester_port),
            alias: None,
        }
    }

    pub fn package(
        validation: Vec<u8>,
        server_ip: Vec<u8>,
        server_port: Vec<u8>,
        alias: Vec<u8>,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            kind: MessageKind::Package,
            validation,
            server_ip: Some(server_ip),
            server_port: Some(server_port),
            requester_ip: None,
            requester_port: None,
            alias: Some(alias),
        }
    }

    /// Serializes the message into a single datagram payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiscoveryError> {
        serde_cbor::to_vec(self).map_err(|e| DiscoveryError::Wire(format!("encode: {}", e)))
    }

    /// Parses a datagram payload, rejecting other schema versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        let message: Self = serde_cbor::from_slice(bytes)
            .map_err(|e| DiscoveryError::Wire(format!("decode: {}", e)))?;
        if message.version != WIRE_VERSION {
            return Err(DiscoveryError::Wire(format!(
                "unsupported wire version {}",
                message.version
            )));
        }
        Ok(message)
    }
}

/// A peer found through discovery, handed to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTarget {
    /// Assigned by the consumer; discovery always emits 0.
    pub id: u64,
    pub ip: String,
    pub port: u16,
    pub alias: String,
    /// Managed by the consumer; discovery leaves it unset.
    pub status: Option<String>,
}

impl DiscoveredTarget {
    pub fn new(ip: impl Into<String>, port: u16, alias: impl Into<String>) -> Self {
        Self {
            id: 0,
            ip: ip.into(),
            port,
            alias: alias.into(),
            status: None,
        }
    }
}

impl fmt::Display for DiscoveredTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== Discovered Target Info ====")?;
        writeln!(f, "Id:\t{}", self.id)?;
        writeln!(f, "IP address:\t{:?}", self.ip)?;
        writeln!(f, "Port:\t{}", self.port)?;
        writeln!(f, "Alias:\t{:?}", self.alias)?;
        write!(f, "Status:\t{:?}", self.status.as_deref().unwrap_or(""))
    }
}
