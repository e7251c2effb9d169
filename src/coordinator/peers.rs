//! Peer coordinator probing
//!
//! A platform can name peer coordinators on other platforms. At startup the
//! local coordinator probes each peer with a short TCP connect and keeps the
//! control URLs of the reachable ones as its own cross-platform addresses.
//! Nothing is sent over these connections here; unreachable peers are logged
//! and skipped.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default control port of a peer coordinator
pub const DEFAULT_PEER_PORT: u16 = 7778;

/// Connect timeout for a reachability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One peer coordinator, as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Peer platform name, for logging only
    pub name: String,
    /// Host the peer coordinator listens on
    pub host: String,
    /// Control port
    #[serde(default = "default_peer_port")]
    pub port: u16,
}

fn default_peer_port() -> u16 {
    DEFAULT_PEER_PORT
}

impl PeerConfig {
    /// Control URL of this peer
    pub fn accessor_url(&self) -> String {
        format!("http://{}:{}/acc", self.host, self.port)
    }

    /// Whether the peer accepts TCP connections within `timeout`
    pub fn probe(&self, timeout: Duration) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                warn!(peer = %self.name, host = %self.host, error = %err, "peer address did not resolve");
                return false;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return true,
                Err(err) => debug!(peer = %self.name, %addr, error = %err, "probe failed"),
            }
        }
        false
    }
}

/// Probe every configured peer and collect the reachable control URLs
pub fn reachable_addresses(peers: &[PeerConfig], timeout: Duration) -> Vec<String> {
    peers
        .iter()
        .filter_map(|peer| {
            if peer.probe(timeout) {
                let url = peer.accessor_url();
                info!(peer = %peer.name, %url, "peer coordinator reachable");
                Some(url)
            } else {
                warn!(peer = %peer.name, host = %peer.host, port = peer.port, "peer coordinator unreachable, skipped");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn peer(host: &str, port: u16) -> PeerConfig {
        PeerConfig {
            name: "alpha".to_string(),
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_accessor_url() {
        assert_eq!(
            peer("10.0.0.5", 7778).accessor_url(),
            "http://10.0.0.5:7778/acc"
        );
    }

    #[test]
    fn test_port_defaults_when_omitted() {
        let parsed: PeerConfig = toml::from_str("name = \"alpha\"\nhost = \"10.0.0.5\"").unwrap();
        assert_eq!(parsed.port, DEFAULT_PEER_PORT);
        assert_eq!(parsed.host, "10.0.0.5");
    }

    #[test]
    fn test_probe_detects_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(peer("127.0.0.1", port).probe(Duration::from_millis(500)));
    }

    #[test]
    fn test_probe_fails_on_a_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!peer("127.0.0.1", port).probe(Duration::from_millis(500)));
    }

    #[test]
    fn test_reachable_addresses_keeps_only_live_peers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live_port = listener.local_addr().unwrap().port();
        let dead = TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let peers = vec![peer("127.0.0.1", live_port), peer("127.0.0.1", dead_port)];
        let urls = reachable_addresses(&peers, Duration::from_millis(500));
        assert_eq!(urls, vec![format!("http://127.0.0.1:{}/acc", live_port)]);
    }
}
