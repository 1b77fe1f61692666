//! Binary block codec used for persistence and byte-exact replication.
//!
//! Layout: 4-byte magic, u32 BE payload length, then the 92-byte header,
//! a u32 transaction count, and the concatenated length-prefixed records.

use certel_core::{Attestation, CertelError, BLOCK_MAGIC};

use crate::block::{Block, BlockHeader, HEADER_BYTES};

pub fn encode_block(block: &Block) -> Result<Vec<u8>, CertelError> {
    let mut payload = block.header.bytes()?;
    payload.extend_from_slice(&(block.transactions.len() as u32).to_be_bytes());
    for tx in &block.transactions {
        tx.encode(&mut payload);
    }

    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&BLOCK_MAGIC.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_block(input: &[u8]) -> Result<Block, CertelError> {
    if input.len() < 8 {
        return Err(CertelError::MalformedPayload("block too short".into()));
    }
    let magic = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    if magic != BLOCK_MAGIC {
        return Err(CertelError::MalformedPayload(format!(
            "bad block magic {magic:#010x}"
        )));
    }
    let payload_len = u32::from_be_bytes([input[4], input[5], input[6], input[7]]) as usize;
    let payload = &input[8..];
    if payload.len() != payload_len {
        return Err(CertelError::MalformedPayload(format!(
            "payload length {} does not match declared {}",
            payload.len(),
            payload_len
        )));
    }
    if payload.len() < HEADER_BYTES + 4 {
        return Err(CertelError::MalformedPayload("truncated header".into()));
    }

    let header = decode_header(&payload[..HEADER_BYTES]);
    let mut pos = HEADER_BYTES;
    let count = u32::from_be_bytes([
        payload[pos],
        payload[pos + 1],
        payload[pos + 2],
        payload[pos + 3],
    ]) as usize;
    pos += 4;

    let mut transactions = Vec::with_capacity(count);
    for _ in 0..count {
        transactions.push(Attestation::decode(payload, &mut pos)?);
    }
    if pos != payload.len() {
        return Err(CertelError::MalformedPayload(
            "trailing bytes after last transaction".into(),
        ));
    }

    Ok(Block {
        header,
        transactions,
    })
}

fn decode_header(bytes: &[u8]) -> BlockHeader {
    let version = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let prev_raw = &bytes[4..36];
    let merkle_raw = &bytes[36..68];
    let timestamp = i64::from_be_bytes(bytes[68..76].try_into().expect("fixed slice"));
    let bits = u32::from_be_bytes(bytes[76..80].try_into().expect("fixed slice"));
    let nonce = u32::from_be_bytes(bytes[80..84].try_into().expect("fixed slice"));
    let height = u64::from_be_bytes(bytes[84..92].try_into().expect("fixed slice"));

    // The genesis parent is the literal "0"; it serializes as the zero word.
    let prev_block_hash = if height == 0 && prev_raw.iter().all(|&b| b == 0) {
        "0".to_string()
    } else {
        hex::encode(prev_raw)
    };
    // An empty body has an empty Merkle root, also carried as the zero word.
    let merkle_root = if merkle_raw.iter().all(|&b| b == 0) {
        String::new()
    } else {
        hex::encode(merkle_raw)
    };

    BlockHeader {
        version,
        prev_block_hash,
        merkle_root,
        timestamp,
        bits,
        nonce,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certel_core::genesis_attestation;
    use chrono::Utc;

    fn tx(inquiry: &str) -> Attestation {
        Attestation::build(
            "-----BEGIN PUBLIC KEY-----\nAA==\n-----END PUBLIC KEY-----",
            "Alice",
            "Doe",
            inquiry,
            Utc::now(),
            "c2ln",
        )
    }

    #[test]
    fn block_round_trip_preserves_everything() {
        let mut block = Block::new(vec![tx("inq-1"), tx("inq-2"), tx("inq-3")], "ab".repeat(32), 5)
            .unwrap();
        block.header.bits = 16;
        block.header.nonce = 123_456;

        let bytes = encode_block(&block).unwrap();
        let back = decode_block(&bytes).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.hash().unwrap(), block.hash().unwrap());
    }

    #[test]
    fn genesis_round_trip_keeps_literal_zero_parent() {
        let block = Block::new(vec![genesis_attestation()], "0", 0).unwrap();
        let back = decode_block(&encode_block(&block).unwrap()).unwrap();
        assert_eq!(back.header.prev_block_hash, "0");
        assert_eq!(back, block);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let block = Block::new(vec![tx("inq-1")], "0", 0).unwrap();
        let mut bytes = encode_block(&block).unwrap();

        let mut corrupted = bytes.clone();
        corrupted[0] ^= 0xff;
        assert!(decode_block(&corrupted).is_err());

        bytes.truncate(bytes.len() - 1);
        assert!(decode_block(&bytes).is_err());
    }

    #[test]
    fn decoded_ids_are_recomputed() {
        let block = Block::new(vec![tx("inq-1")], "0", 1).unwrap();
        let back = decode_block(&encode_block(&block).unwrap()).unwrap();
        assert_eq!(back.transactions[0].id, back.transactions[0].compute_id());
    }
}
