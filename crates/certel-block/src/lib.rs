pub mod block;
pub mod genesis;
pub mod merkle;
pub mod wire;

pub use block::{hash_to_bytes32, Block, BlockHeader};
pub use genesis::genesis_block;
pub use merkle::merkle_root;
pub use wire::{decode_block, encode_block};
