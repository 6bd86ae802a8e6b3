//! Encrypted LAN service discovery (disco).
//!
//! A requester broadcasts a sealed request over UDP; every peer holding the same
//! cipher key and token zone answers directly with a sealed package naming its
//! service address, port and alias. Validation relies on a token derived from
//! the calendar day, so there is no key exchange. Messages are CBOR encoded and
//! each field is individually encrypted with AES-256-CFB.

pub mod agent;
pub mod context;
pub mod crypto;
pub mod error;
pub mod handler;
pub mod messages;
pub mod net;
pub mod token;
pub mod transport;

pub use agent::{AgentConfig, DiscoveryAgent, DiscoveryListener};
pub use context::DiscoveryContext;
pub use crypto::{CipherKey, FieldCodec, Framing, StreamCipher};
pub use error::{AggregateError, CryptoError, DiscoveryError, FrameError};
pub use handler::{DiscoveryHandler, DropReason, HandlerConfig, OpenedMessage, Outcome};
pub use messages::{
    DiscoveredTarget, DiscoveryMessage, MessageKind, DISCOVERY_PORT, WIRE_VERSION,
};
pub use token::TokenGenerator;
pub use transport::{CborUdpTransport, DiscoveryTransport};
