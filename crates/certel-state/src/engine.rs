use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certel_block::{genesis_block, Block};
use certel_consensus::{mine_header, validate_header, DifficultySchedule, MineOutcome};
use certel_core::{
    Attestation, AttestationStatus, CertelError, INITIAL_BITS, MAX_BITS, MAX_TX_PER_BLOCK,
    MINING_TICK_SECS, MIN_BITS, RETARGET_WINDOW, TARGET_BLOCK_TIME_SECS,
};
use certel_crypto::verify_signature;

use crate::db::{CertRecord, Store};

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct ChainSettings {
    pub initial_bits: u32,
    pub min_bits: u32,
    pub max_bits: u32,
    pub retarget_window: u64,
    /// Target wall time between blocks (seconds), for retargeting.
    pub target_block_time: i64,
    pub max_tx_per_block: usize,
    pub mining_tick: Duration,
    /// Admission requires a verifying signature. Disabled only on closed
    /// test networks.
    pub require_signature: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            initial_bits: INITIAL_BITS,
            min_bits: MIN_BITS,
            max_bits: MAX_BITS,
            retarget_window: RETARGET_WINDOW,
            target_block_time: TARGET_BLOCK_TIME_SECS,
            max_tx_per_block: MAX_TX_PER_BLOCK,
            mining_tick: Duration::from_secs(MINING_TICK_SECS),
            require_signature: true,
        }
    }
}

// ── ChainManager ──────────────────────────────────────────────────────────────

struct ChainState {
    /// Height-indexed; element 0 is genesis.
    blocks: Vec<Block>,
    /// Difficulty applied to the next candidate block.
    bits: u32,
}

/// Exclusive owner of the chain, the mempool and the difficulty state.
///
/// All chain mutations are serialized through the write half of the chain
/// lock; queries take the read half. The mempool has its own lock and is never
/// held across a chain operation.
pub struct ChainManager {
    store: Arc<Store>,
    schedule: DifficultySchedule,
    settings: ChainSettings,
    chain: RwLock<ChainState>,
    mempool: Mutex<Vec<Attestation>>,
}

impl ChainManager {
    /// Load the persisted chain, or create and persist genesis on first start.
    pub fn open(store: Arc<Store>, settings: ChainSettings) -> Result<Self, CertelError> {
        let schedule = DifficultySchedule::new(
            settings.retarget_window,
            settings.target_block_time,
            settings.min_bits,
            settings.max_bits,
        );

        let blocks = match store.tip_height()? {
            Some(tip) => {
                let mut blocks = Vec::with_capacity(tip as usize + 1);
                for height in 0..=tip {
                    let block = store.get_block_by_height(height)?.ok_or_else(|| {
                        CertelError::Storage(format!("missing persisted block at height {height}"))
                    })?;
                    blocks.push(block);
                }
                info!(height = tip, "loaded persisted chain");
                blocks
            }
            None => {
                let mut genesis = genesis_block(settings.initial_bits)?;
                match mine_header(&mut genesis.header, &CancellationToken::new())? {
                    MineOutcome::Mined => {}
                    other => {
                        return Err(CertelError::Internal(format!(
                            "genesis mining failed: {other:?}"
                        )))
                    }
                }
                store.save_block(&genesis)?;
                project_certs(&store, &genesis);
                info!(hash = %genesis.hash()?, "created genesis block");
                vec![genesis]
            }
        };

        let bits = replay_bits(&blocks, &schedule);
        Ok(Self {
            store,
            schedule,
            settings,
            chain: RwLock::new(ChainState { blocks, bits }),
            mempool: Mutex::new(Vec::new()),
        })
    }

    // ── Mempool ──────────────────────────────────────────────────────────────

    /// Validate and pool a submitted attestation. Returns its id.
    pub fn add_transaction(
        &self,
        mut tx: Attestation,
        now: DateTime<Utc>,
    ) -> Result<String, CertelError> {
        tx.id = tx.compute_id();
        tx.validate_static(now)?;
        if self.settings.require_signature {
            verify_signature(&tx.public_key, &tx.canonical_message(), &tx.signature)?;
        }

        if self.store.get_cert_by_inquiry(&tx.inquiry_id)?.is_some() {
            return Err(CertelError::DuplicateInquiry(tx.inquiry_id));
        }

        let mut pool = self.mempool.lock().expect("mempool lock poisoned");
        if pool.iter().any(|p| p.id == tx.id) {
            return Err(CertelError::DuplicateInPool(tx.id));
        }
        if pool.iter().any(|p| p.inquiry_id == tx.inquiry_id) {
            return Err(CertelError::DuplicateInquiry(tx.inquiry_id));
        }

        let id = tx.id.clone();
        debug!(id = %id, inquiry = %tx.inquiry_id, "transaction pooled");
        pool.push(tx);
        Ok(id)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().expect("mempool lock poisoned").len()
    }

    // ── Block acceptance ─────────────────────────────────────────────────────

    /// Validate a block against the tip and, if it extends the chain, persist
    /// it, project its transactions into the indexes and drain matching
    /// mempool entries.
    pub fn accept_block(&self, mut block: Block) -> Result<(), CertelError> {
        // Ids are never trusted from the wire; a body whose Merkle root was
        // built over fabricated ids fails the structure check below.
        for tx in &mut block.transactions {
            tx.id = tx.compute_id();
        }
        block.verify_structure()?;
        let block_hash = block.hash()?;

        let mut chain = self.chain.write().expect("chain lock poisoned");
        let tip = chain.blocks.last().expect("chain always holds genesis");
        let tip_hash = tip.hash()?;
        let tip_height = tip.header.height;

        if block.header.height <= tip_height {
            let existing = &chain.blocks[block.header.height as usize];
            return if existing.hash()? == block_hash {
                Err(CertelError::DuplicateBlock(block_hash))
            } else {
                Err(CertelError::InvalidBlock(format!(
                    "conflicts with accepted block at height {}",
                    block.header.height
                )))
            };
        }
        if block.header.height != tip_height + 1 {
            return Err(CertelError::InvalidBlock(format!(
                "height {} does not extend tip {}",
                block.header.height, tip_height
            )));
        }
        if block.header.prev_block_hash != tip_hash {
            return Err(CertelError::InvalidBlock("parent hash mismatch".into()));
        }
        if block.header.bits != chain.bits {
            return Err(CertelError::InvalidBlock(format!(
                "difficulty mismatch: block {}, expected {}",
                block.header.bits, chain.bits
            )));
        }
        if !validate_header(&block.header)? {
            return Err(CertelError::InvalidProofOfWork);
        }

        let mut seen_inquiries = HashSet::new();
        for tx in &block.transactions {
            if tx.is_genesis_sentinel() {
                return Err(CertelError::InvalidBlock(
                    "genesis sentinel outside block 0".into(),
                ));
            }
            if !seen_inquiries.insert(tx.inquiry_id.as_str()) {
                return Err(CertelError::InvalidBlock(format!(
                    "inquiry {} repeated within block",
                    tx.inquiry_id
                )));
            }
            if self.store.get_cert_by_inquiry(&tx.inquiry_id)?.is_some() {
                return Err(CertelError::InvalidBlock(format!(
                    "inquiry {} already recorded on chain",
                    tx.inquiry_id
                )));
            }
        }

        let height = block.header.height;
        let tx_count = block.transactions.len();
        chain.blocks.push(block);

        if let Err(e) = self.store.save_block(chain.blocks.last().expect("just pushed")) {
            // Pooled transactions were never removed, so truncating the
            // in-memory append is the whole rollback.
            chain.blocks.pop();
            return Err(CertelError::Internal(format!("persisting block: {e}")));
        }
        project_certs(&self.store, chain.blocks.last().expect("just pushed"));

        {
            let accepted = chain.blocks.last().expect("just pushed");
            let mut pool = self.mempool.lock().expect("mempool lock poisoned");
            pool.retain(|p| {
                !accepted
                    .transactions
                    .iter()
                    .any(|t| t.id == p.id || t.inquiry_id == p.inquiry_id)
            });
        }

        if self.schedule.is_boundary(height) {
            let start_idx = (height - self.schedule.window + 1) as usize;
            let start = chain.blocks[start_idx].header.timestamp;
            let end = chain.blocks[height as usize].header.timestamp;
            chain.bits = self.schedule.retarget(chain.bits, start, end);
        }

        info!(height, hash = %block_hash, txs = tx_count, "accepted block");
        Ok(())
    }

    // ── Mining ───────────────────────────────────────────────────────────────

    /// One mining attempt: pack a candidate from the mempool, search a nonce,
    /// accept on success. Returns the new block hash if one was accepted.
    pub fn mine_once(&self, cancel: &CancellationToken) -> Result<Option<String>, CertelError> {
        let Some(mut block) = self.build_candidate()? else {
            return Ok(None);
        };
        match mine_header(&mut block.header, cancel)? {
            MineOutcome::Mined => {
                let hash = block.hash()?;
                self.accept_block(block)?;
                Ok(Some(hash))
            }
            MineOutcome::Exhausted => {
                // The next tick rebuilds the candidate with a fresh timestamp.
                debug!("nonce space exhausted; rewinding");
                Ok(None)
            }
            MineOutcome::Cancelled => Ok(None),
        }
    }

    /// Periodic mining ticker. Nonce search runs on the blocking pool and
    /// observes `cancel` every nonce window.
    pub async fn mining_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.mining_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("mining loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let mgr = Arc::clone(&self);
            let token = cancel.clone();
            match tokio::task::spawn_blocking(move || mgr.mine_once(&token)).await {
                Ok(Ok(Some(hash))) => debug!(hash = %hash, "mined block"),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(error = %e, "mining attempt failed"),
                Err(e) => warn!(error = %e, "mining task panicked"),
            }
        }
    }

    fn build_candidate(&self) -> Result<Option<Block>, CertelError> {
        let selected: Vec<Attestation> = {
            let pool = self.mempool.lock().expect("mempool lock poisoned");
            if pool.is_empty() {
                return Ok(None);
            }
            pool.iter()
                .take(self.settings.max_tx_per_block)
                .cloned()
                .map(|mut tx| {
                    tx.status = AttestationStatus::Mined;
                    tx
                })
                .collect()
        };

        let (prev_hash, height, bits) = {
            let chain = self.chain.read().expect("chain lock poisoned");
            let tip = chain.blocks.last().expect("chain always holds genesis");
            (tip.hash()?, tip.header.height + 1, chain.bits)
        };

        let mut block = Block::new(selected, prev_hash, height)?;
        block.header.bits = bits;
        Ok(Some(block))
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn query_by_pk(&self, public_key: &str) -> Result<Option<CertRecord>, CertelError> {
        if let Some(rec) = self.store.get_cert_by_pk(public_key)? {
            return Ok(Some(rec));
        }
        self.scan_chain(|tx| tx.public_key == public_key)
    }

    pub fn query_by_identity(
        &self,
        name: &str,
        surname: &str,
    ) -> Result<Option<CertRecord>, CertelError> {
        if let Some(rec) = self.store.get_cert_by_identity(name, surname)? {
            return Ok(Some(rec));
        }
        self.scan_chain(|tx| tx.name == name && tx.surname == surname)
    }

    pub fn query_by_inquiry(&self, inquiry_id: &str) -> Result<Option<CertRecord>, CertelError> {
        if let Some(rec) = self.store.get_cert_by_inquiry(inquiry_id)? {
            return Ok(Some(rec));
        }
        self.scan_chain(|tx| tx.inquiry_id == inquiry_id)
    }

    /// Newest-to-oldest chain walk, used when the store lacks an index row
    /// (e.g. after a crash or an expiry sweep). A hit repairs the indexes.
    fn scan_chain(
        &self,
        pred: impl Fn(&Attestation) -> bool,
    ) -> Result<Option<CertRecord>, CertelError> {
        let chain = self.chain.read().expect("chain lock poisoned");
        for block in chain.blocks.iter().rev() {
            if let Some(tx) = block.transactions.iter().rev().find(|tx| pred(tx)) {
                let rec = CertRecord {
                    public_key: tx.public_key.clone(),
                    name: tx.name.clone(),
                    surname: tx.surname.clone(),
                    inquiry_id: tx.inquiry_id.clone(),
                    datetime: tx.datetime,
                    block_hash: block.hash()?,
                    height: block.header.height,
                };
                if let Err(e) = self.store.save_cert(&rec) {
                    warn!(error = %e, "index repair write failed");
                }
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn height(&self) -> u64 {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain.blocks.last().expect("genesis").header.height
    }

    pub fn tip(&self) -> Block {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain.blocks.last().expect("genesis").clone()
    }

    pub fn tip_hash(&self) -> Result<String, CertelError> {
        self.tip().hash()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain.blocks.get(height as usize).cloned()
    }

    pub fn all_blocks(&self) -> Vec<Block> {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain.blocks.clone()
    }

    pub fn current_bits(&self) -> u32 {
        self.chain.read().expect("chain lock poisoned").bits
    }

    /// Cache-hygiene sweep over the cert indexes; the chain is untouched.
    pub fn expire_certs(&self, older_than: DateTime<Utc>) -> Result<u64, CertelError> {
        self.store.expire_certs(older_than)
    }
}

/// Write the index projection for every transaction of an accepted block.
/// Failures are logged, not fatal: the indexes are rebuildable from the chain.
fn project_certs(store: &Store, block: &Block) {
    let hash = match block.hash() {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "skipping cert projection: unhashable block");
            return;
        }
    };
    for tx in &block.transactions {
        let rec = CertRecord {
            public_key: tx.public_key.clone(),
            name: tx.name.clone(),
            surname: tx.surname.clone(),
            inquiry_id: tx.inquiry_id.clone(),
            datetime: tx.datetime,
            block_hash: hash.clone(),
            height: block.header.height,
        };
        if let Err(e) = store.save_cert(&rec) {
            warn!(error = %e, inquiry = %tx.inquiry_id, "cert projection failed");
        }
    }
}

/// Recompute the current difficulty by replaying retarget boundaries over the
/// persisted chain.
fn replay_bits(blocks: &[Block], schedule: &DifficultySchedule) -> u32 {
    let mut bits = blocks[0].header.bits;
    for height in 1..blocks.len() as u64 {
        if schedule.is_boundary(height) {
            let start = blocks[(height - schedule.window + 1) as usize].header.timestamp;
            let end = blocks[height as usize].header.timestamp;
            bits = schedule.retarget(bits, start, end);
        }
    }
    bits
}
