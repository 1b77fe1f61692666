use certel_core::{genesis_attestation, AttestationStatus, CertelError, GENESIS_TIMESTAMP};

use crate::block::Block;
use crate::merkle::merkle_root;

/// Build the unmined genesis block: one sentinel record, parent `"0"`,
/// height 0, the fixed genesis timestamp. Every field is deterministic, so a
/// nonce search from zero yields the same block on every node of a network.
pub fn genesis_block(bits: u32) -> Result<Block, CertelError> {
    let mut sentinel = genesis_attestation();
    sentinel.status = AttestationStatus::Mined;

    let root = merkle_root(std::slice::from_ref(&sentinel))?;
    let mut block = Block::new(vec![sentinel], "0", 0)?;
    block.header.merkle_root = root;
    block.header.timestamp = GENESIS_TIMESTAMP;
    block.header.bits = bits;
    block.header.nonce = 0;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = genesis_block(16).unwrap();
        let b = genesis_block(16).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        assert_eq!(a.header.height, 0);
        assert_eq!(a.header.prev_block_hash, "0");
        assert_eq!(a.header.timestamp, GENESIS_TIMESTAMP);
    }

    #[test]
    fn genesis_merkle_root_is_the_sentinel_id() {
        let g = genesis_block(16).unwrap();
        assert_eq!(g.header.merkle_root, g.transactions[0].id);
        assert!(g.verify_structure().is_ok());
    }
}
