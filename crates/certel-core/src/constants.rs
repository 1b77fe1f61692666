//! ─── Certel Protocol Constants ──────────────────────────────────────────────
//!
//! An append-only chain of attestations binding a human identity (name,
//! surname, externally verified inquiry token) to an RSA public key.

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Blocks ───────────────────────────────────────────────────────────────────

/// Current block header version.
pub const BLOCK_VERSION: u32 = 1;

/// Network magic prefixing the binary block wire form.
pub const BLOCK_MAGIC: u32 = 0xD9B4_BEF9;

/// Maximum transactions packed into one mined block.
pub const MAX_TX_PER_BLOCK: usize = 1000;

/// Interval between mining attempts (seconds).
pub const MINING_TICK_SECS: u64 = 30;

/// Target wall time between blocks (seconds). Drives difficulty retargeting,
/// not the mining tick.
pub const TARGET_BLOCK_TIME_SECS: i64 = 600;

// ── Proof-of-Work ─────────────────────────────────────────────────────────────

/// Genesis default: leading zero bits required in the SHA-256 header hash.
pub const INITIAL_BITS: u32 = 16;

pub const MIN_BITS: u32 = 1;
pub const MAX_BITS: u32 = 32;

/// Blocks between difficulty adjustments.
pub const RETARGET_WINDOW: u64 = 2016;

/// Nonces between cancellation checks while mining.
pub const MINE_CANCEL_WINDOW: u32 = 100_000;

// ── Transaction admission ─────────────────────────────────────────────────────

/// Oldest acceptable `datetime` relative to the receiving node's clock.
pub const TX_MAX_AGE_SECS: i64 = 24 * 3600;

/// Furthest-future acceptable `datetime` relative to the node's clock.
pub const TX_MAX_FUTURE_SECS: i64 = 5 * 60;

// ── Genesis sentinel ──────────────────────────────────────────────────────────

/// Placeholder public key of the genesis record: forty zeros, not a real key.
pub const GENESIS_PUBLIC_KEY: &str = "0000000000000000000000000000000000000000";
pub const GENESIS_NAME: &str = "Genesis";
pub const GENESIS_SURNAME: &str = "Block";
pub const GENESIS_INQUIRY: &str = "genesis";

/// Genesis timestamp: 2024-01-01 00:00:00 UTC. Fixed so every node of a
/// network derives an identical genesis block.
pub const GENESIS_TIMESTAMP: Timestamp = 1_704_067_200;

// ── Identity verification ─────────────────────────────────────────────────────

/// Maximum age of an inquiry before the verifier rejects it (seconds).
pub const MAX_INQUIRY_AGE_SECS: i64 = 24 * 3600;

/// Index rows older than this are swept by cache hygiene (seconds, one year).
pub const CERT_EXPIRY_SECS: i64 = 8760 * 3600;

// ── Networking ────────────────────────────────────────────────────────────────

/// Protocol version advertised in UDP discovery messages.
pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_API_PORT: u16 = 8333;
pub const DEFAULT_DISCOVERY_PORT: u16 = 45678;

/// Peers unseen for this long are evicted (seconds).
pub const PEER_TTL_SECS: i64 = 5 * 60;

/// Consecutive failures before a peer is evicted.
pub const MAX_PEER_FAILURES: u32 = 3;

/// Interval of the peer liveness sweep (seconds).
pub const PEER_SWEEP_SECS: u64 = 30;

/// Interval of the UDP discovery broadcast (seconds).
pub const BROADCAST_INTERVAL_SECS: u64 = 30;

/// UDP read deadline so the reader can observe cancellation (seconds).
pub const UDP_READ_DEADLINE_SECS: u64 = 1;

/// Cascade discovery: maximum BFS depth over the peer graph.
pub const MAX_HOPS: u32 = 3;

/// Cascade discovery: concurrent `/peers` fetches per hop.
pub const CASCADE_BATCH: usize = 5;

/// Minimum seconds between two cascade walks.
pub const CASCADE_COOLDOWN_SECS: u64 = 5 * 60;

/// Interval between sync passes (seconds).
pub const SYNC_INTERVAL_SECS: u64 = 60;

// ── HTTP timeouts (seconds) ───────────────────────────────────────────────────

pub const PEER_HTTP_TIMEOUT_SECS: u64 = 10;
pub const SYNC_HTTP_TIMEOUT_SECS: u64 = 30;
pub const VERIFIER_TIMEOUT_SECS: u64 = 30;
pub const HEALTH_TIMEOUT_SECS: u64 = 5;
