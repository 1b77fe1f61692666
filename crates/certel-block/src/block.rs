use chrono::Utc;
use serde::{Deserialize, Serialize};

use certel_core::{Attestation, CertelError, Timestamp, BLOCK_VERSION};
use certel_crypto::sha256;

use crate::merkle::merkle_root;

// ── BlockHeader ───────────────────────────────────────────────────────────────

/// Fixed-layout header. The block hash is SHA-256 over [`BlockHeader::bytes`],
/// all integers big-endian, hash strings left-zero-padded to 32 raw bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the block at `height - 1`; the literal `"0"` for genesis.
    pub prev_block_hash: String,
    pub merkle_root: String,
    /// Unix seconds, UTC.
    pub timestamp: Timestamp,
    /// Required leading zero bits in the block hash.
    pub bits: u32,
    pub nonce: u32,
    pub height: u64,
}

/// Serialized header width: 4 + 32 + 32 + 8 + 4 + 4 + 8.
pub const HEADER_BYTES: usize = 92;

impl BlockHeader {
    /// Canonical byte form hashed for proof-of-work.
    pub fn bytes(&self) -> Result<Vec<u8>, CertelError> {
        let mut out = Vec::with_capacity(HEADER_BYTES);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&hash_to_bytes32(&self.prev_block_hash)?);
        out.extend_from_slice(&hash_to_bytes32(&self.merkle_root)?);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.bits.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        Ok(out)
    }

    /// Lowercase-hex SHA-256 of the header bytes.
    pub fn hash(&self) -> Result<String, CertelError> {
        Ok(hex::encode(sha256(&self.bytes()?)))
    }
}

// ── Block ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered body; never empty (genesis carries one sentinel record).
    pub transactions: Vec<Attestation>,
}

impl Block {
    /// Candidate block at `height` on top of `prev_block_hash`: timestamped
    /// now, Merkle root computed, `bits` and `nonce` left for the miner.
    pub fn new(
        transactions: Vec<Attestation>,
        prev_block_hash: impl Into<String>,
        height: u64,
    ) -> Result<Self, CertelError> {
        let root = merkle_root(&transactions)?;
        Ok(Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_block_hash: prev_block_hash.into(),
                merkle_root: root,
                timestamp: Utc::now().timestamp(),
                bits: 0,
                nonce: 0,
                height,
            },
            transactions,
        })
    }

    pub fn hash(&self) -> Result<String, CertelError> {
        self.header.hash()
    }

    /// Structural checks independent of chain position: non-empty body, the
    /// stored Merkle root matches the recomputed one, every transaction is
    /// shape-valid.
    pub fn verify_structure(&self) -> Result<(), CertelError> {
        if self.transactions.is_empty() {
            return Err(CertelError::InvalidBlock("empty body".into()));
        }
        let recomputed = merkle_root(&self.transactions)?;
        if recomputed != self.header.merkle_root {
            return Err(CertelError::InvalidBlock(format!(
                "merkle root mismatch: stored {}, recomputed {}",
                self.header.merkle_root, recomputed
            )));
        }
        for tx in &self.transactions {
            tx.validate_shape()?;
        }
        Ok(())
    }
}

/// Decode a hex digest string into 32 raw bytes, left-padding with zeros.
/// `"0"` (genesis parent) and `""` (empty Merkle root) become the zero word.
pub fn hash_to_bytes32(hex_str: &str) -> Result<[u8; 32], CertelError> {
    if hex_str.len() > 64 {
        return Err(CertelError::MalformedPayload(format!(
            "hash longer than 32 bytes: {hex_str}"
        )));
    }
    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex_str.len()) {
        padded.push('0');
    }
    padded.push_str(hex_str);
    let bytes = hex::decode(&padded)
        .map_err(|e| CertelError::MalformedPayload(format!("hash hex: {e}")))?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
