//! Header-only proof-of-work: the engine sees header bytes and `bits`, never
//! transactions.
//!
//! `bits` is the number of leading zero bits required of the SHA-256 header
//! hash, so the target is `1 << (256 - bits)` and `hash < target` holds
//! exactly when the hash has at least `bits` leading zero bits.

use tokio_util::sync::CancellationToken;

use certel_block::BlockHeader;
use certel_core::{CertelError, MINE_CANCEL_WINDOW};
use certel_crypto::sha256;

/// Byte offset of the nonce within the canonical header layout
/// (version 4 + prev 32 + merkle 32 + timestamp 8 + bits 4).
const NONCE_OFFSET: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MineOutcome {
    /// A winning nonce was written into the header.
    Mined,
    /// All 2^32 nonces failed; the caller rewinds the timestamp and retries.
    Exhausted,
    /// Shutdown observed mid-search; the header is unchanged.
    Cancelled,
}

/// `hash(header_bytes)` interpreted big-endian is strictly below the target.
pub fn validate(header_bytes: &[u8], bits: u32) -> bool {
    leading_zero_bits(&sha256(header_bytes)) >= bits
}

pub fn validate_header(header: &BlockHeader) -> Result<bool, CertelError> {
    Ok(validate(&header.bytes()?, header.bits))
}

/// Search nonces 0..=u32::MAX, patching the nonce in place and rehashing.
/// Cancellation is observed every [`MINE_CANCEL_WINDOW`] nonces.
pub fn mine_header(
    header: &mut BlockHeader,
    cancel: &CancellationToken,
) -> Result<MineOutcome, CertelError> {
    let mut bytes = header.bytes()?;
    let mut nonce: u32 = 0;
    loop {
        bytes[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_be_bytes());
        if validate(&bytes, header.bits) {
            header.nonce = nonce;
            return Ok(MineOutcome::Mined);
        }
        if nonce % MINE_CANCEL_WINDOW == 0 && cancel.is_cancelled() {
            return Ok(MineOutcome::Cancelled);
        }
        if nonce == u32::MAX {
            return Ok(MineOutcome::Exhausted);
        }
        nonce += 1;
    }
}

fn leading_zero_bits(hash: &[u8; 32]) -> u32 {
    let mut count = 0u32;
    for byte in hash {
        let lz = byte.leading_zeros();
        count += lz;
        if lz < 8 {
            break;
        }
    }
    count
}
