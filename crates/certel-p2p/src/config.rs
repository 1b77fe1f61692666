use std::time::Duration;

use certel_core::{
    BROADCAST_INTERVAL_SECS, CASCADE_BATCH, CASCADE_COOLDOWN_SECS, DEFAULT_API_PORT,
    DEFAULT_DISCOVERY_PORT, MAX_HOPS, MAX_PEER_FAILURES, PEER_SWEEP_SECS, PEER_TTL_SECS,
    SYNC_INTERVAL_SECS,
};

/// Configuration for the Certel peer-to-peer subsystems (UDP discovery, peer
/// table, cascade discovery, sync).
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Host other peers can reach this node on.
    pub host: String,
    /// HTTP API port advertised to peers.
    pub api_port: u16,
    /// UDP discovery port, shared by the whole network.
    pub discovery_port: u16,
    /// Admission token: datagrams without it are silently dropped.
    pub flag: String,
    /// Opaque network identifier echoed in responses.
    pub network_id: String,
    pub peer_ttl_secs: i64,
    pub max_failures: u32,
    pub max_hops: u32,
    pub cascade_batch: usize,
    pub cascade_cooldown: Duration,
    pub sync_interval: Duration,
    pub sweep_interval: Duration,
    pub broadcast_interval: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            api_port: DEFAULT_API_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            flag: String::new(),
            network_id: String::new(),
            peer_ttl_secs: PEER_TTL_SECS,
            max_failures: MAX_PEER_FAILURES,
            max_hops: MAX_HOPS,
            cascade_batch: CASCADE_BATCH,
            cascade_cooldown: Duration::from_secs(CASCADE_COOLDOWN_SECS),
            sync_interval: Duration::from_secs(SYNC_INTERVAL_SECS),
            sweep_interval: Duration::from_secs(PEER_SWEEP_SECS),
            broadcast_interval: Duration::from_secs(BROADCAST_INTERVAL_SECS),
        }
    }
}

impl P2pConfig {
    /// This node's own advertised `host:port`, excluded from the peer table.
    pub fn self_address(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }
}
