//! Small network helpers for applications embedding discovery.

use std::net::IpAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time;
use tracing::debug;

use crate::error::DiscoveryError;

/// Default deadline of [`is_reachable`].
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// First IPv4 address the local host name resolves to, as a string.
///
/// Meant as the requester address of outgoing requests; pass an explicit
/// address instead on multi-homed hosts.
pub async fn local_ipv4() -> Result<String, DiscoveryError> {
    let host = hostname::get()
        .map_err(|e| DiscoveryError::Config(format!("host name lookup: {}", e)))?
        .into_string()
        .map_err(|_| DiscoveryError::Config("host name is not valid unicode".into()))?;
    let addr = lookup_host((host.as_str(), 0))
        .await
        .map_err(|e| DiscoveryError::Network(format!("resolve {}: {}", host, e)))?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| DiscoveryError::Network(format!("no IPv4 address for {}", host)))?;
    Ok(addr.to_string())
}

/// Whether a TCP connection to `addr` (`host:port`) completes within `timeout`.
pub async fn is_reachable(addr: &str, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!(addr, error = %err, "target unreachable");
            false
        }
        Err(_) => {
            debug!(addr, ?timeout, "target dial timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn live_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(is_reachable(&addr, DIAL_TIMEOUT).await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        assert!(!is_reachable(&addr, DIAL_TIMEOUT).await);
    }

    #[tokio::test]
    async fn malformed_address_is_unreachable() {
        assert!(!is_reachable("not an address", Duration::from_millis(200)).await);
    }
}
