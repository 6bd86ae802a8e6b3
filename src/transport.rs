use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::DiscoveryError;
use crate::messages::{DiscoveryMessage, MAX_DATAGRAM_SIZE};

/// Minimal send/receive capability discovery needs from a transport.
///
/// Implemented for CBOR over UDP; other carriers (multicast, in-memory pipes in
/// tests) only need to move whole [`DiscoveryMessage`]s.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    async fn send(&self, msg: &DiscoveryMessage) -> Result<(), DiscoveryError>;
    async fn recv(&self) -> Result<(DiscoveryMessage, SocketAddr), DiscoveryError>;
}

/// CBOR-over-UDP transport for discovery traffic.
#[derive(Debug)]
pub struct CborUdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    max_size: usize,
}

impl CborUdpTransport {
    /// Binds a receiving socket on `local`.
    pub async fn bind(local: SocketAddr, max_size: usize) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| DiscoveryError::Network(format!("listen on {}: {}", local, e)))?;
        Ok(Self {
            socket,
            peer: None,
            max_size,
        })
    }

    /// Opens an ephemeral socket dialed to `peer`.
    pub async fn dial(peer: SocketAddr) -> Result<Self, DiscoveryError> {
        let socket = Self::ephemeral(peer).await?;
        Self::connect(socket, peer).await
    }

    /// Like [`dial`](Self::dial), with `SO_BROADCAST` enabled first.
    pub async fn dial_broadcast(peer: SocketAddr) -> Result<Self, DiscoveryError> {
        let socket = Self::ephemeral(peer).await?;
        socket
            .set_broadcast(true)
            .map_err(|e| DiscoveryError::Network(format!("enable broadcast: {}", e)))?;
        Self::connect(socket, peer).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn ephemeral(peer: SocketAddr) -> Result<UdpSocket, DiscoveryError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        UdpSocket::bind(local)
            .await
            .map_err(|e| DiscoveryError::Network(format!("bind local socket: {}", e)))
    }

    async fn connect(socket: UdpSocket, peer: SocketAddr) -> Result<Self, DiscoveryError> {
        socket
            .connect(peer)
            .await
            .map_err(|e| DiscoveryError::Network(format!("dial {}: {}", peer, e)))?;
        Ok(Self {
            socket,
            peer: Some(peer),
            max_size: MAX_DATAGRAM_SIZE,
        })
    }
}

#[async_trait]
impl DiscoveryTransport for CborUdpTransport {
    async fn send(&self, msg: &DiscoveryMessage) -> Result<(), DiscoveryError> {
        let bytes = msg.to_bytes()?;
        if bytes.len() > self.max_size {
            return Err(DiscoveryError::Wire(format!(
                "message of {} bytes exceeds datagram limit {}",
                bytes.len(),
                self.max_size
            )));
        }
        let peer = self
            .peer
            .ok_or_else(|| DiscoveryError::Network("transport has no peer to send to".into()))?;
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| DiscoveryError::Network(format!("send to {}: {}", peer, e)))?;
        Ok(())
    }

    async fn recv(&self) -> Result<(DiscoveryMessage, SocketAddr), DiscoveryError> {
        let mut buf = vec![0u8; self.max_size];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        let msg = DiscoveryMessage::from_bytes(&buf[..len])?;
        Ok((msg, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dialed_transport_reaches_listener() {
        let listener = CborUdpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_DATAGRAM_SIZE)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = CborUdpTransport::dial(addr).await.unwrap();
        assert_eq!(sender.peer(), Some(addr));
        let msg = DiscoveryMessage::request(vec![1, 2], vec![3], vec![4]);
        sender.send(&msg).await.unwrap();
        let (got, from) = listener.recv().await.unwrap();
        assert_eq!(got, msg);
        assert_eq!(from.port(), sender.local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn unbound_peer_cannot_send() {
        let listener = CborUdpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_DATAGRAM_SIZE)
            .await
            .unwrap();
        assert_eq!(listener.peer(), None);
        let msg = DiscoveryMessage::request(vec![], vec![], vec![]);
        assert!(matches!(
            listener.send(&msg).await,
            Err(DiscoveryError::Network(_))
        ));
    }
}
