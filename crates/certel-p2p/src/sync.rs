use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certel_block::Block;
use certel_core::{CertelError, SYNC_HTTP_TIMEOUT_SECS};
use certel_state::ChainManager;

use crate::config::P2pConfig;
use crate::peers::PeerManager;

/// Peers sampled per sync pass.
const SAMPLE_SIZE: usize = 3;

/// Longest-valid-chain pull synchronization: sample peers, compare tips, pull
/// missing heights in order and feed them through block acceptance. A peer
/// whose block fails validation is marked suspect and skipped; already
/// accepted blocks never reorganize.
pub struct Synchronizer {
    cfg: P2pConfig,
    peers: Arc<PeerManager>,
    chain: Arc<ChainManager>,
    client: reqwest::Client,
}

impl Synchronizer {
    pub fn new(
        cfg: P2pConfig,
        peers: Arc<PeerManager>,
        chain: Arc<ChainManager>,
    ) -> Result<Self, CertelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SYNC_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| CertelError::Internal(format!("building sync client: {e}")))?;
        Ok(Self {
            cfg,
            peers,
            chain,
            client,
        })
    }

    /// Sync on start and then on every interval tick.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("synchronizer stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let pulled = self.sync_once().await;
            if pulled > 0 {
                info!(pulled, height = self.chain.height(), "synchronized from peers");
            }
        }
    }

    /// One pass over a random peer sample. Returns the number of blocks
    /// accepted.
    pub async fn sync_once(&self) -> usize {
        let mut addrs = self.peers.addresses();
        {
            let mut rng = rand::thread_rng();
            addrs.shuffle(&mut rng);
        }
        addrs.truncate(SAMPLE_SIZE);

        let mut pulled = 0usize;
        for addr in addrs {
            pulled += self.pull_from(&addr).await;
        }
        pulled
    }

    async fn pull_from(&self, addr: &str) -> usize {
        let latest = match self.fetch_block(addr, "latest").await {
            Ok(block) => block,
            Err(e) => {
                debug!(peer = %addr, error = %e, "latest-block fetch failed");
                self.peers.record_failure(addr);
                return 0;
            }
        };

        let peer_height = latest.header.height;
        self.peers.set_advertised(addr, None, Some(peer_height));

        let local_height = self.chain.height();
        if peer_height <= local_height {
            self.peers.touch(addr);
            return 0;
        }
        debug!(peer = %addr, peer_height, local_height, "pulling missing blocks");

        let mut pulled = 0usize;
        for height in (local_height + 1)..=peer_height {
            let block = match self.fetch_block(addr, &height.to_string()).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(peer = %addr, height, error = %e, "block fetch failed");
                    self.peers.record_failure(addr);
                    return pulled;
                }
            };
            match self.chain.accept_block(block) {
                Ok(()) => pulled += 1,
                Err(CertelError::DuplicateBlock(_)) => {
                    // Another peer delivered this height mid-pass.
                }
                Err(e) => {
                    // A diverging or invalid chain: mark the source suspect.
                    warn!(peer = %addr, height, error = %e, "peer block rejected");
                    self.peers.record_failure(addr);
                    return pulled;
                }
            }
        }

        self.peers.touch(addr);
        pulled
    }

    async fn fetch_block(&self, addr: &str, which: &str) -> Result<Block, CertelError> {
        let url = format!("http://{addr}/api/v1/blocks/{which}");
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
        resp.json::<Block>()
            .await
            .map_err(|e| CertelError::UpstreamFailure(format!("decoding {url}: {e}")))
    }
}
