//! Discovery agent: owns the listening socket and sends broadcast requests.
//!
//! # Listen loop
//! * Without a stop token the loop never returns; every datagram is decoded
//!   and handed to the handler on its own task.
//! * With a stop token the loop checks the token, then waits for a datagram
//!   for at most the receive timeout. An elapsed deadline is not an error, it
//!   only gives the loop a chance to observe the token, so shutdown can take
//!   up to one timeout.
//! * Handler tasks already spawned keep running after the loop stops.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::context::DiscoveryContext;
use crate::error::{AggregateError, DiscoveryError};
use crate::handler::DiscoveryHandler;
use crate::messages::{
    DiscoveryMessage, BROADCAST_IP, DEFAULT_RECEIVE_TIMEOUT, DISCOVERY_PORT, MAX_DATAGRAM_SIZE,
};
use crate::transport::{CborUdpTransport, DiscoveryTransport};

/// Pause after a socket-level receive failure before the next attempt.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Socket settings for a discovery agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Port the listener binds and requests name as the reply port.
    pub port: u16,
    pub bind_ip: IpAddr,
    /// Destination of broadcast requests.
    pub broadcast_ip: IpAddr,
    /// Receive deadline of a cancellable listen loop; 30 s when unset or zero.
    pub receive_timeout: Option<Duration>,
    pub max_datagram_size: usize,
}

impl AgentConfig {
    /// The receive deadline; unset or zero means 30 s.
    pub fn effective_timeout(&self) -> Duration {
        self.receive_timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_RECEIVE_TIMEOUT)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: BROADCAST_IP,
            receive_timeout: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Listens for discovery traffic and broadcasts requests.
#[derive(Debug, Clone)]
pub struct DiscoveryAgent {
    config: AgentConfig,
    context: DiscoveryContext,
}

impl DiscoveryAgent {
    pub fn new(config: AgentConfig, context: DiscoveryContext) -> Self {
        Self { config, context }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Binds the listener socket without starting the loop.
    pub async fn bind(&self) -> Result<DiscoveryListener, DiscoveryError> {
        let addr = SocketAddr::new(self.config.bind_ip, self.config.port);
        let transport = CborUdpTransport::bind(addr, self.config.max_datagram_size).await?;
        Ok(DiscoveryListener {
            transport,
            timeout: self.config.effective_timeout(),
        })
    }

    /// Binds and runs the listen loop until `stop` is cancelled (forever when
    /// `stop` is `None`).
    ///
    /// # Errors
    /// Only a failure to bind the listener; per-datagram failures are logged.
    pub async fn listen(
        &self,
        handler: Arc<DiscoveryHandler>,
        stop: Option<CancellationToken>,
    ) -> Result<(), DiscoveryError> {
        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(error = %err, "failed to bind discovery listener");
                return Err(err);
            }
        };
        listener.run(handler, stop).await
    }

    /// Builds a request asking peers to answer `local_ip` on this agent's port.
    pub fn build_request(&self, local_ip: &str) -> Result<DiscoveryMessage, DiscoveryError> {
        let codec = self.context.codec();
        let validation = self.context.sealed_token();
        let requester_ip = if local_ip.is_empty() {
            Err(DiscoveryError::Config("local ip was not supplied".into()))
        } else {
            codec.seal(local_ip)
        };
        let requester_port = if self.config.port == 0 {
            Err(DiscoveryError::Config("discovery port was not set".into()))
        } else {
            codec.seal(&self.config.port.to_string())
        };

        match (validation, requester_ip, requester_port) {
            (Ok(validation), Ok(requester_ip), Ok(requester_port)) => Ok(
                DiscoveryMessage::request(validation, requester_ip, requester_port),
            ),
            (validation, requester_ip, requester_port) => {
                Err(AggregateError::new("failed to build discovery request")
                    .record("validation", validation.err())
                    .record("requester ip", requester_ip.err())
                    .record("requester port", requester_port.err())
                    .into())
            }
        }
    }

    /// Sends `msg` to the broadcast address on `target_port` through a
    /// one-shot socket.
    pub async fn broadcast(
        &self,
        handler: &DiscoveryHandler,
        msg: &DiscoveryMessage,
        target_port: u16,
    ) -> Result<(), DiscoveryError> {
        let target = SocketAddr::new(self.config.broadcast_ip, target_port);
        let transport = CborUdpTransport::dial_broadcast(target).await?;
        handler.send(&transport, msg).await?;
        debug!(%target, kind = ?msg.kind, "broadcast discovery message");
        Ok(())
    }

    /// Builds a request for `local_ip` and broadcasts it to `target_port`.
    pub async fn broadcast_request(
        &self,
        handler: &DiscoveryHandler,
        local_ip: &str,
        target_port: u16,
    ) -> Result<(), DiscoveryError> {
        let request = self.build_request(local_ip)?;
        self.broadcast(handler, &request, target_port).await
    }
}

/// A bound discovery socket, ready to run the listen loop.
///
/// The socket closes when the loop returns.
#[derive(Debug)]
pub struct DiscoveryListener {
    transport: CborUdpTransport,
    timeout: Duration,
}

impl DiscoveryListener {
    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        self.transport.local_addr()
    }

    pub async fn run(
        self,
        handler: Arc<DiscoveryHandler>,
        stop: Option<CancellationToken>,
    ) -> Result<(), DiscoveryError> {
        let addr = self.local_addr()?;
        match stop {
            None => {
                info!(%addr, "discovery listener running until process exit");
                loop {
                    self.receive_once(&handler).await;
                }
            }
            Some(stop) => {
                info!(%addr, timeout = ?self.timeout, "discovery listener running");
                while !stop.is_cancelled() {
                    match time::timeout(self.timeout, self.transport.recv()).await {
                        Ok(received) => {
                            if let Some(pause) = self.dispatch(&handler, received) {
                                time::sleep(pause).await;
                            }
                        }
                        Err(_) => trace!("receive deadline elapsed"),
                    }
                }
                info!(%addr, "discovery listener stopped");
                Ok(())
            }
        }
    }

    async fn receive_once(&self, handler: &Arc<DiscoveryHandler>) {
        let received = self.transport.recv().await;
        if let Some(pause) = self.dispatch(handler, received) {
            time::sleep(pause).await;
        }
    }

    /// Hands a received message to the handler on its own task. Returns how
    /// long to pause when the socket itself failed.
    fn dispatch(
        &self,
        handler: &Arc<DiscoveryHandler>,
        received: Result<(DiscoveryMessage, SocketAddr), DiscoveryError>,
    ) -> Option<Duration> {
        let (msg, peer) = match received {
            Ok(received) => received,
            Err(err) => {
                warn!(error = %err, "failed to receive discovery message");
                return matches!(err, DiscoveryError::Network(_)).then_some(RECV_ERROR_BACKOFF);
            }
        };
        debug!(%peer, kind = ?msg.kind, "dispatching discovery message");
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            match handler.handle(msg).await {
                Ok(outcome) => trace!(%peer, ?outcome, "discovery message handled"),
                Err(err) => warn!(%peer, error = %err, "failed to handle discovery message"),
            }
        });
        None
    }
}
