use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use certel_core::{CertelError, HEALTH_TIMEOUT_SECS, PEER_HTTP_TIMEOUT_SECS};

use crate::config::P2pConfig;
use crate::peers::PeerManager;

/// Result of one cascade trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeOutcome {
    Completed { discovered: usize },
    /// Another walk is in flight; concurrent triggers coalesce.
    AlreadyRunning,
    /// The previous walk finished less than the cooldown ago.
    CoolingDown,
}

#[derive(Default)]
struct CascadeState {
    last_run: Option<Instant>,
}

/// Minimal health shape checked when validating a candidate peer.
#[derive(Debug, Deserialize)]
struct HealthProbe {
    status: String,
    #[serde(rename = "networkFlag", default)]
    network_flag: Option<String>,
}

/// Bounded BFS over the peer graph: each hop fetches `/peers` from the
/// previous frontier in small concurrent batches, validates candidates via
/// `/api/v1/health`, and stops early once a hop discovers nothing new.
pub struct CascadeDiscovery {
    cfg: P2pConfig,
    peers: Arc<PeerManager>,
    client: reqwest::Client,
    state: Mutex<CascadeState>,
}

impl CascadeDiscovery {
    pub fn new(cfg: P2pConfig, peers: Arc<PeerManager>) -> Result<Self, CertelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PEER_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| CertelError::Internal(format!("building cascade client: {e}")))?;
        Ok(Self {
            cfg,
            peers,
            client,
            state: Mutex::new(CascadeState::default()),
        })
    }

    /// Run one walk unless one is already running or cooling down.
    pub async fn run_once(&self) -> CascadeOutcome {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(_) => return CascadeOutcome::AlreadyRunning,
        };
        if let Some(last) = state.last_run {
            if last.elapsed() < self.cfg.cascade_cooldown {
                return CascadeOutcome::CoolingDown;
            }
        }

        let discovered = self.walk().await;
        state.last_run = Some(Instant::now());
        if discovered > 0 {
            info!(discovered, peers = self.peers.len(), "cascade discovery finished");
        }
        CascadeOutcome::Completed { discovered }
    }

    async fn walk(&self) -> usize {
        let mut frontier = self.peers.addresses();
        let mut discovered = 0usize;

        for hop in 1..=self.cfg.max_hops {
            if frontier.is_empty() {
                break;
            }

            // Collect candidate addresses from this frontier.
            let mut candidates: Vec<String> = Vec::new();
            for batch in frontier.chunks(self.cfg.cascade_batch.max(1)) {
                let fetches = batch.iter().map(|addr| self.fetch_peer_list(addr));
                for (addr, result) in batch.iter().zip(join_all(fetches).await) {
                    match result {
                        Ok(listed) => {
                            self.peers.touch(addr);
                            candidates.extend(listed);
                        }
                        Err(e) => {
                            debug!(peer = %addr, error = %e, "peer exchange failed");
                            self.peers.record_failure(addr);
                        }
                    }
                }
            }

            candidates.sort();
            candidates.dedup();
            candidates.retain(|addr| {
                PeerManager::parse_address(addr)
                    .map(|normalized| {
                        normalized != self.cfg.self_address() && !self.peers.contains(&normalized)
                    })
                    .unwrap_or(false)
            });

            // Validate survivors before admitting them.
            let mut next_frontier = Vec::new();
            for batch in candidates.chunks(self.cfg.cascade_batch.max(1)) {
                let checks = batch.iter().map(|addr| self.validate_peer(addr));
                for (addr, healthy) in batch.iter().zip(join_all(checks).await) {
                    if healthy && self.peers.add_peer(addr) {
                        next_frontier.push(addr.clone());
                    }
                }
            }

            if next_frontier.is_empty() {
                debug!(hop, "cascade found nothing new; stopping early");
                break;
            }
            discovered += next_frontier.len();
            frontier = next_frontier;
        }

        discovered
    }

    /// `GET /peers` on a known peer: the legacy bare address array.
    async fn fetch_peer_list(&self, addr: &str) -> Result<Vec<String>, CertelError> {
        let url = format!("http://{addr}/peers");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CertelError::UpstreamFailure(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(CertelError::UpstreamFailure(format!(
                "GET {url}: HTTP {}",
                resp.status()
            )));
        }
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| CertelError::UpstreamFailure(format!("decoding {url}: {e}")))
    }

    /// A candidate is admitted only if its health endpoint answers within the
    /// probe timeout, reports an ok status, and carries our network flag.
    async fn validate_peer(&self, addr: &str) -> bool {
        let url = format!("http://{addr}/api/v1/health");
        let resp = match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(peer = %addr, status = %resp.status(), "health probe rejected");
                return false;
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "health probe failed");
                return false;
            }
        };
        match resp.json::<HealthProbe>().await {
            Ok(health) => {
                let status_ok = matches!(health.status.as_str(), "ok" | "healthy");
                let flag_ok = health.network_flag.as_deref() == Some(self.cfg.flag.as_str());
                if !flag_ok {
                    warn!(peer = %addr, "peer rejected: foreign network flag");
                }
                status_ok && flag_ok
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "health probe undecodable");
                false
            }
        }
    }
}
