pub mod hash;
pub mod signature;

pub use hash::{double_sha256, fingerprint, merkle_pair, sha256};
pub use signature::{generate_keypair_pem, sign_message, verify_signature, Keypair};
