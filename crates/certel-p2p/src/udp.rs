use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certel_core::{CertelError, PROTOCOL_VERSION, UDP_READ_DEADLINE_SECS};

use crate::config::P2pConfig;
use crate::peers::PeerManager;

const MSG_CLIENT_DISCOVERY: &str = "client_discovery";
const MSG_NODE_ANNOUNCE: &str = "node_announce";

/// One structured discovery datagram. The same shape covers both directions:
/// `client_discovery` probes carry `client_id`, `node_announce` replies carry
/// the responder's API `port`.
#[derive(Debug, Serialize, Deserialize)]
struct DiscoveryMessage {
    flag: String,
    version: u32,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    timestamp: i64,
}

/// UDP LAN discovery: one socket answering structured JSON probes and the
/// legacy plain-flag text, plus a periodic outbound broadcast. Datagrams
/// without the configured flag are dropped silently; the flag is the
/// network's admission filter.
pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    cfg: P2pConfig,
    peers: Arc<PeerManager>,
}

impl DiscoveryService {
    pub async fn bind(cfg: P2pConfig, peers: Arc<PeerManager>) -> Result<Self, CertelError> {
        let socket = UdpSocket::bind(("0.0.0.0", cfg.discovery_port))
            .await
            .map_err(|e| {
                CertelError::Internal(format!("binding UDP port {}: {e}", cfg.discovery_port))
            })?;
        socket
            .set_broadcast(true)
            .map_err(|e| CertelError::Internal(format!("enabling broadcast: {e}")))?;
        info!(port = cfg.discovery_port, "UDP discovery listening");
        Ok(Self {
            socket: Arc::new(socket),
            cfg,
            peers,
        })
    }

    /// Reader plus broadcast ticker. Reads use a short deadline so the loop
    /// observes cancellation promptly.
    pub async fn run(self, cancel: CancellationToken) {
        let mut broadcast_tick = tokio::time::interval(self.cfg.broadcast_interval);
        broadcast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("UDP discovery stopped");
                    return;
                }
                _ = broadcast_tick.tick() => {
                    self.broadcast().await;
                }
                recv = tokio::time::timeout(
                    Duration::from_secs(UDP_READ_DEADLINE_SECS),
                    self.socket.recv_from(&mut buf),
                ) => {
                    match recv {
                        Err(_) => {} // read deadline; re-check cancellation
                        Ok(Err(e)) => warn!(error = %e, "UDP receive failed"),
                        Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from).await,
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        if let Ok(msg) = serde_json::from_slice::<DiscoveryMessage>(data) {
            if msg.flag != self.cfg.flag {
                debug!(%from, "dropping datagram with wrong flag");
                return;
            }
            match msg.kind.as_str() {
                MSG_CLIENT_DISCOVERY => {
                    let reply = DiscoveryMessage {
                        flag: self.cfg.flag.clone(),
                        version: PROTOCOL_VERSION,
                        kind: MSG_NODE_ANNOUNCE.into(),
                        client_id: None,
                        port: Some(self.cfg.api_port),
                        timestamp: Utc::now().timestamp(),
                    };
                    self.send_json(&reply, from).await;
                }
                MSG_NODE_ANNOUNCE => {
                    if let Some(port) = msg.port {
                        let addr = format!("{}:{}", from.ip(), port);
                        if self.peers.add_peer(&addr) {
                            info!(peer = %addr, "peer learned from UDP announce");
                        }
                        self.peers.touch(&addr);
                        self.peers.set_advertised(&addr, Some(msg.version), None);
                    }
                }
                other => debug!(%from, kind = other, "ignoring unknown discovery type"),
            }
            return;
        }

        // Legacy shape: the bare flag string, answered with NODE:<host>:<port>.
        match std::str::from_utf8(data) {
            Ok(text) if text.trim() == self.cfg.flag => {
                let reply = format!("NODE:{}:{}", self.cfg.host, self.cfg.api_port);
                if let Err(e) = self.socket.send_to(reply.as_bytes(), from).await {
                    warn!(error = %e, %from, "legacy discovery reply failed");
                }
            }
            _ => debug!(%from, "dropping unrecognized datagram"),
        }
    }

    /// Announce ourselves: broadcast a structured probe, then unicast it to
    /// every validated peer's discovery port.
    async fn broadcast(&self) {
        let probe = DiscoveryMessage {
            flag: self.cfg.flag.clone(),
            version: PROTOCOL_VERSION,
            kind: MSG_CLIENT_DISCOVERY.into(),
            client_id: Some(format!("node:{}", self.cfg.self_address())),
            port: Some(self.cfg.api_port),
            timestamp: Utc::now().timestamp(),
        };
        let target: SocketAddr = ("255.255.255.255".parse::<std::net::IpAddr>()
            .expect("broadcast address literal"), self.cfg.discovery_port)
            .into();
        self.send_json(&probe, target).await;

        for addr in self.peers.addresses() {
            if let Some((host, _)) = addr.rsplit_once(':') {
                if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                    let target: SocketAddr = (ip, self.cfg.discovery_port).into();
                    self.send_json(&probe, target).await;
                }
            }
        }
    }

    async fn send_json(&self, msg: &DiscoveryMessage, to: SocketAddr) {
        match serde_json::to_vec(msg) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    debug!(error = %e, %to, "discovery send failed");
                }
            }
            Err(e) => warn!(error = %e, "encoding discovery message failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(flag: &str, discovery_port: u16, api_port: u16) -> P2pConfig {
        P2pConfig {
            host: "127.0.0.1".into(),
            api_port,
            discovery_port,
            flag: flag.into(),
            network_id: "testnet".into(),
            ..P2pConfig::default()
        }
    }

    async fn service(flag: &str, api_port: u16) -> (DiscoveryService, u16) {
        // Bind to an ephemeral port by asking the OS first.
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let cfg = cfg(flag, port, api_port);
        let peers = Arc::new(PeerManager::new(cfg.clone()));
        (DiscoveryService::bind(cfg, peers).await.unwrap(), port)
    }

    #[tokio::test]
    async fn structured_probe_gets_node_announce() {
        let (svc, port) = service("flag-a", 9001).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let probe = serde_json::json!({
            "flag": "flag-a",
            "version": 1,
            "type": "client_discovery",
            "client_id": "test-client",
            "timestamp": Utc::now().timestamp(),
        });
        let from = client.local_addr().unwrap();
        svc.handle_datagram(&serde_json::to_vec(&probe).unwrap(), from)
            .await;

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: DiscoveryMessage = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(reply.kind, "node_announce");
        assert_eq!(reply.port, Some(9001));
        assert_eq!(reply.flag, "flag-a");
    }

    #[tokio::test]
    async fn wrong_flag_is_dropped_silently() {
        let (svc, _) = service("flag-a", 9001).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let probe = serde_json::json!({
            "flag": "other-network",
            "version": 1,
            "type": "client_discovery",
            "client_id": "x",
            "timestamp": 0,
        });
        svc.handle_datagram(
            &serde_json::to_vec(&probe).unwrap(),
            client.local_addr().unwrap(),
        )
        .await;

        let mut buf = [0u8; 64];
        let got = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(got.is_err(), "no reply expected for a foreign flag");
    }

    #[tokio::test]
    async fn legacy_flag_text_gets_node_line() {
        let (svc, _) = service("flag-a", 9001).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        svc.handle_datagram(b"flag-a", client.local_addr().unwrap())
            .await;

        let mut buf = [0u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"NODE:127.0.0.1:9001");
    }

    #[tokio::test]
    async fn node_announce_feeds_peer_table() {
        let (svc, _) = service("flag-a", 9001).await;
        let announce = serde_json::json!({
            "flag": "flag-a",
            "version": 1,
            "type": "node_announce",
            "port": 8444,
            "timestamp": Utc::now().timestamp(),
        });
        let from: SocketAddr = "10.9.9.9:45678".parse().unwrap();
        svc.handle_datagram(&serde_json::to_vec(&announce).unwrap(), from)
            .await;
        assert!(svc.peers.contains("10.9.9.9:8444"));
    }
}
