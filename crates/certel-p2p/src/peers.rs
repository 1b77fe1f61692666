use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::P2pConfig;

/// What the node knows about one peer.
#[derive(Clone, Debug, Serialize)]
pub struct PeerInfo {
    pub last_seen: DateTime<Utc>,
    pub advertised_version: Option<u32>,
    pub advertised_height: Option<u64>,
    pub consecutive_failures: u32,
}

/// Exclusive owner of the peer table. Peers arrive from the seed file, UDP
/// announces and peer exchange; a periodic sweep evicts the stale and the
/// repeatedly failing.
pub struct PeerManager {
    cfg: P2pConfig,
    table: RwLock<HashMap<String, PeerInfo>>,
}

impl PeerManager {
    pub fn new(cfg: P2pConfig) -> Self {
        Self {
            cfg,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Normalize and validate a `host:port` string.
    pub fn parse_address(addr: &str) -> Option<String> {
        let trimmed = addr.trim();
        let (host, port) = trimmed.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        if port == 0 {
            return None;
        }
        Some(format!("{host}:{port}"))
    }

    /// Insert a peer if it is well-formed, not ourselves and not yet known.
    /// Returns true when the table grew.
    pub fn add_peer(&self, addr: &str) -> bool {
        let Some(normalized) = Self::parse_address(addr) else {
            return false;
        };
        if normalized == self.cfg.self_address() {
            return false;
        }
        let mut table = self.table.write().expect("peer table lock poisoned");
        if table.contains_key(&normalized) {
            return false;
        }
        debug!(peer = %normalized, "peer added");
        table.insert(
            normalized,
            PeerInfo {
                last_seen: Utc::now(),
                advertised_version: None,
                advertised_height: None,
                consecutive_failures: 0,
            },
        );
        true
    }

    /// Record a successful contact: refresh `last_seen`, clear failures.
    pub fn touch(&self, addr: &str) {
        let mut table = self.table.write().expect("peer table lock poisoned");
        if let Some(info) = table.get_mut(addr) {
            info.last_seen = Utc::now();
            info.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, addr: &str) {
        let mut table = self.table.write().expect("peer table lock poisoned");
        if let Some(info) = table.get_mut(addr) {
            info.consecutive_failures += 1;
        }
    }

    pub fn set_advertised(&self, addr: &str, version: Option<u32>, height: Option<u64>) {
        let mut table = self.table.write().expect("peer table lock poisoned");
        if let Some(info) = table.get_mut(addr) {
            if version.is_some() {
                info.advertised_version = version;
            }
            if height.is_some() {
                info.advertised_height = height;
            }
        }
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.table
            .read()
            .expect("peer table lock poisoned")
            .contains_key(addr)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.table
            .read()
            .expect("peer table lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<(String, PeerInfo)> {
        self.table
            .read()
            .expect("peer table lock poisoned")
            .iter()
            .map(|(addr, info)| (addr.clone(), info.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().expect("peer table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict peers over the failure cap or unseen beyond the TTL. Returns the
    /// number evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.cfg.peer_ttl_secs;
        let max_failures = self.cfg.max_failures;
        let mut table = self.table.write().expect("peer table lock poisoned");
        let before = table.len();
        table.retain(|addr, info| {
            let stale = now.timestamp() - info.last_seen.timestamp() > ttl;
            let failing = info.consecutive_failures >= max_failures;
            if stale || failing {
                debug!(peer = %addr, stale, failing, "peer evicted");
            }
            !(stale || failing)
        });
        before - table.len()
    }

    /// Periodic liveness sweep.
    pub async fn maintenance_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("peer maintenance stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let evicted = self.sweep(Utc::now());
            if evicted > 0 {
                info!(evicted, remaining = self.len(), "peer sweep");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn manager() -> PeerManager {
        let cfg = P2pConfig {
            host: "10.0.0.1".into(),
            api_port: 8333,
            flag: "testnet".into(),
            ..P2pConfig::default()
        };
        PeerManager::new(cfg)
    }

    #[test]
    fn parse_address_accepts_host_port_only() {
        assert_eq!(
            PeerManager::parse_address(" 10.0.0.2:8333 "),
            Some("10.0.0.2:8333".into())
        );
        assert!(PeerManager::parse_address("10.0.0.2").is_none());
        assert!(PeerManager::parse_address(":8333").is_none());
        assert!(PeerManager::parse_address("host:0").is_none());
        assert!(PeerManager::parse_address("host:notaport").is_none());
    }

    #[test]
    fn add_peer_dedups_and_skips_self() {
        let mgr = manager();
        assert!(mgr.add_peer("10.0.0.2:8333"));
        assert!(!mgr.add_peer("10.0.0.2:8333"));
        assert!(!mgr.add_peer("10.0.0.1:8333")); // own address
        assert!(!mgr.add_peer("garbage"));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn sweep_evicts_stale_and_failing() {
        let mgr = manager();
        mgr.add_peer("10.0.0.2:8333");
        mgr.add_peer("10.0.0.3:8333");
        mgr.add_peer("10.0.0.4:8333");

        // Peer 2 fails repeatedly.
        for _ in 0..MAX_FAILURES_FOR_TEST {
            mgr.record_failure("10.0.0.2:8333");
        }
        // Peer 3 was last seen beyond the TTL.
        {
            let mut table = mgr.table.write().unwrap();
            table.get_mut("10.0.0.3:8333").unwrap().last_seen =
                Utc::now() - Duration::seconds(mgr.cfg.peer_ttl_secs + 1);
        }

        let evicted = mgr.sweep(Utc::now());
        assert_eq!(evicted, 2);
        assert!(!mgr.contains("10.0.0.2:8333"));
        assert!(!mgr.contains("10.0.0.3:8333"));
        assert!(mgr.contains("10.0.0.4:8333"));
    }

    const MAX_FAILURES_FOR_TEST: u32 = certel_core::MAX_PEER_FAILURES;

    #[test]
    fn touch_clears_failures() {
        let mgr = manager();
        mgr.add_peer("10.0.0.2:8333");
        mgr.record_failure("10.0.0.2:8333");
        mgr.touch("10.0.0.2:8333");
        let snap = mgr.snapshot();
        assert_eq!(snap[0].1.consecutive_failures, 0);
    }

    #[test]
    fn advertised_height_is_retained() {
        let mgr = manager();
        mgr.add_peer("10.0.0.2:8333");
        mgr.set_advertised("10.0.0.2:8333", Some(1), Some(42));
        let snap = mgr.snapshot();
        assert_eq!(snap[0].1.advertised_height, Some(42));
        assert_eq!(snap[0].1.advertised_version, Some(1));
    }
}
