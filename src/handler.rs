//! Reaction to a single received discovery message.
//!
//! The handler decrypts the message, checks it against today's token and
//! then either answers a request, forwards a package to the caller's result
//! channel, or drops it. Forged, stale and self-originated traffic is dropped
//! and logged; only structural, crypto, config and network failures surface
//! as errors.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, info, trace, warn};

use crate::context::DiscoveryContext;
use crate::error::{AggregateError, DiscoveryError};
use crate::messages::{DiscoveredTarget, DiscoveryMessage, MessageKind};
use crate::transport::{CborUdpTransport, DiscoveryTransport};

/// Local service details announced in responses.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Address advertised to requesters; also used to spot our own requests.
    pub app_ip: Option<String>,
    pub app_port: Option<u16>,
    /// Alias advertised to requesters; the host name when unset.
    pub alias: Option<String>,
    /// Upper bound on waiting for room in the result channel. Unset means wait
    /// as long as it takes.
    pub enqueue_timeout: Option<Duration>,
}

/// Why a message was dropped without reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A request we sent ourselves came back through the broadcast.
    Loopback,
    /// The validation token is not today's.
    TokenMismatch,
    UnknownKind(u8),
}

/// What handling a message led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A response was sent to the requester at this address.
    Responded(SocketAddr),
    /// A target was pushed onto the result channel.
    Discovered(DiscoveredTarget),
    /// A valid package arrived but the target could not be delivered (no
    /// channel, channel closed, or enqueue timed out).
    Discarded(DiscoveredTarget),
    Dropped(DropReason),
}

/// Plaintext view of a [`DiscoveryMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub kind: MessageKind,
    pub validation: String,
    pub server_ip: Option<String>,
    pub server_port: Option<String>,
    pub requester_ip: Option<String>,
    pub requester_port: Option<String>,
    pub alias: Option<String>,
}

/// Default discovery handler: answers requests and collects packages.
#[derive(Debug)]
pub struct DiscoveryHandler {
    context: DiscoveryContext,
    config: HandlerConfig,
    targets: Option<mpsc::Sender<DiscoveredTarget>>,
}

impl DiscoveryHandler {
    pub fn new(context: DiscoveryContext, config: HandlerConfig) -> Self {
        Self {
            context,
            config,
            targets: None,
        }
    }

    /// Delivers discovered targets to `targets`. Without a channel, valid
    /// packages are discarded.
    pub fn with_targets(mut self, targets: mpsc::Sender<DiscoveredTarget>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn context(&self) -> &DiscoveryContext {
        &self.context
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Sends `msg` over `transport`.
    pub async fn send<T>(&self, transport: &T, msg: &DiscoveryMessage) -> Result<(), DiscoveryError>
    where
        T: DiscoveryTransport + ?Sized,
    {
        trace!(kind = ?msg.kind, "sending discovery message");
        transport.send(msg).await
    }

    /// Decrypts every present field of `msg`.
    ///
    /// All failing fields are reported together in one aggregate error.
    pub fn open(&self, msg: &DiscoveryMessage) -> Result<OpenedMessage, DiscoveryError> {
        let codec = self.context.codec();
        let open_optional = |field: &Option<Vec<u8>>| field.as_deref().map(|f| codec.open(f)).transpose();

        let validation = codec.open(&msg.validation);
        let server_ip = open_optional(&msg.server_ip);
        let server_port = open_optional(&msg.server_port);
        let requester_ip = open_optional(&msg.requester_ip);
        let requester_port = open_optional(&msg.requester_port);
        let alias = open_optional(&msg.alias);

        match (validation, server_ip, server_port, requester_ip, requester_port, alias) {
            (
                Ok(validation),
                Ok(server_ip),
                Ok(server_port),
                Ok(requester_ip),
                Ok(requester_port),
                Ok(alias),
            ) => Ok(OpenedMessage {
                kind: msg.kind,
                validation,
                server_ip,
                server_port,
                requester_ip,
                requester_port,
                alias,
            }),
            (validation, server_ip, server_port, requester_ip, requester_port, alias) => {
                Err(AggregateError::new("failed to decrypt discovery message")
                    .record("validation", validation.err())
                    .record("server ip", server_ip.err())
                    .record("server port", server_port.err())
                    .record("requester ip", requester_ip.err())
                    .record("requester port", requester_port.err())
                    .record("alias", alias.err())
                    .into())
            }
        }
    }

    /// Processes one inbound message.
    ///
    /// # Errors
    /// Decrypt failures, missing config, unparseable server ports and send
    /// failures. Token mismatches, loopback requests and unknown kinds are
    /// reported as [`Outcome::Dropped`] instead.
    pub async fn handle(&self, msg: DiscoveryMessage) -> Result<Outcome, DiscoveryError> {
        let opened = self.open(&msg)?;
        let expected = self.context.tokens().token()?;
        let valid = opened.validation == expected;

        match opened.kind {
            MessageKind::Request if valid => {
                debug!("received discovery request");
                self.handle_request(&opened).await
            }
            MessageKind::Package if valid => {
                debug!("received discovery package");
                self.handle_package(opened).await
            }
            MessageKind::Unknown(code) => {
                debug!(code, "dropped discovery message of unknown kind");
                Ok(Outcome::Dropped(DropReason::UnknownKind(code)))
            }
            kind => {
                debug!(?kind, "dropped discovery message with invalid token");
                Ok(Outcome::Dropped(DropReason::TokenMismatch))
            }
        }
    }

    /// Builds the package answering a request: sealed address, port, today's
    /// token and the local alias.
    pub fn build_response(&self, app_ip: &str, app_port: u16) -> Result<DiscoveryMessage, DiscoveryError> {
        let codec = self.context.codec();
        let server_ip = codec.seal(app_ip);
        let server_port = codec.seal(&app_port.to_string());
        let validation = self.context.sealed_token();
        let alias = self.local_alias().and_then(|alias| codec.seal(&alias));

        match (validation, server_ip, server_port, alias) {
            (Ok(validation), Ok(server_ip), Ok(server_port), Ok(alias)) => Ok(
                DiscoveryMessage::package(validation, server_ip, server_port, alias),
            ),
            (validation, server_ip, server_port, alias) => {
                Err(AggregateError::new("failed to build discovery response")
                    .record("validation", validation.err())
                    .record("server ip", server_ip.err())
                    .record("server port", server_port.err())
                    .record("alias", alias.err())
                    .into())
            }
        }
    }

    async fn handle_request(&self, opened: &OpenedMessage) -> Result<Outcome, DiscoveryError> {
        let app_ip = self
            .config
            .app_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| DiscoveryError::Config("app ip was not set".into()))?;
        let requester_ip = opened
            .requester_ip
            .as_deref()
            .ok_or(DiscoveryError::MissingField("requester ip"))?;

        if requester_ip == app_ip {
            debug!(requester = requester_ip, "dropped loopback discovery request");
            return Ok(Outcome::Dropped(DropReason::Loopback));
        }

        let requester_port = opened
            .requester_port
            .as_deref()
            .ok_or(DiscoveryError::MissingField("requester port"))?;
        let (app_ip, app_port) = self.app_address()?;
        let response = self.build_response(app_ip, app_port)?;
        let peer = resolve_peer(requester_ip, requester_port).await?;

        let transport = CborUdpTransport::dial(peer).await?;
        self.send(&transport, &response).await?;
        info!(%peer, "sent discovery response");
        Ok(Outcome::Responded(peer))
    }

    async fn handle_package(&self, opened: OpenedMessage) -> Result<Outcome, DiscoveryError> {
        let server_ip = opened
            .server_ip
            .ok_or(DiscoveryError::MissingField("server ip"))?;
        let raw_port = opened
            .server_port
            .ok_or(DiscoveryError::MissingField("server port"))?;
        let port = match raw_port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                debug!(port = %raw_port, "dropped discovery package");
                return Err(DiscoveryError::InvalidPort(raw_port));
            }
        };

        let target = DiscoveredTarget::new(server_ip, port, opened.alias.unwrap_or_default());
        Ok(self.enqueue(target).await)
    }

    async fn enqueue(&self, target: DiscoveredTarget) -> Outcome {
        let Some(targets) = &self.targets else {
            trace!(ip = %target.ip, "no result channel; discovered target discarded");
            return Outcome::Discarded(target);
        };

        let sent = match self.config.enqueue_timeout {
            None => targets
                .send(target.clone())
                .await
                .map_err(|_| "result channel closed"),
            Some(limit) => targets
                .send_timeout(target.clone(), limit)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => "result channel full",
                    SendTimeoutError::Closed(_) => "result channel closed",
                }),
        };

        match sent {
            Ok(()) => {
                info!(ip = %target.ip, port = target.port, alias = %target.alias, "discovered target");
                Outcome::Discovered(target)
            }
            Err(reason) => {
                warn!(ip = %target.ip, port = target.port, reason, "discarded discovered target");
                Outcome::Discarded(target)
            }
        }
    }

    fn app_address(&self) -> Result<(&str, u16), DiscoveryError> {
        let ip = self.config.app_ip.as_deref().filter(|ip| !ip.is_empty());
        let port = self.config.app_port.filter(|port| *port != 0);
        match (ip, port) {
            (Some(ip), Some(port)) => Ok((ip, port)),
            (ip, port) => Err(AggregateError::new("discovery handler config is incomplete")
                .record(
                    "app ip",
                    ip.is_none()
                        .then(|| DiscoveryError::Config("app ip was not set".into())),
                )
                .record(
                    "app port",
                    port.is_none()
                        .then(|| DiscoveryError::Config("app port was not set".into())),
                )
                .into()),
        }
    }

    fn local_alias(&self) -> Result<String, DiscoveryError> {
        if let Some(alias) = &self.config.alias {
            return Ok(alias.clone());
        }
        hostname::get()
            .map_err(|e| DiscoveryError::Config(format!("host name lookup: {}", e)))?
            .into_string()
            .map_err(|_| DiscoveryError::Config("host name is not valid unicode".into()))
    }
}

async fn resolve_peer(ip: &str, port: &str) -> Result<SocketAddr, DiscoveryError> {
    let port: u16 = port
        .parse()
        .map_err(|_| DiscoveryError::Network(format!("invalid requester port {:?}", port)))?;
    if let Ok(addr) = ip.parse::<IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }
    tokio::net::lookup_host((ip, port))
        .await
        .map_err(|e| DiscoveryError::Network(format!("resolve {}: {}", ip, e)))?
        .next()
        .ok_or_else(|| DiscoveryError::Network(format!("no address for {}", ip)))
}
