use rsa::pkcs8::DecodePublicKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use certel_core::CertelError;

/// SHA-256 of arbitrary bytes → 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 applied twice.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Merkle parent of two lowercase-hex child digests: concatenate the raw
/// 32-byte values and hash once.
pub fn merkle_pair(left_hex: &str, right_hex: &str) -> Result<String, CertelError> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&decode_digest(left_hex)?);
    buf.extend_from_slice(&decode_digest(right_hex)?);
    Ok(hex::encode(sha256(&buf)))
}

/// SHA-256 over the DER-encoded SubjectPublicKeyInfo, lowercase hex.
pub fn fingerprint(public_key_pem: &str) -> Result<String, CertelError> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CertelError::MalformedPayload(format!("public key PEM: {e}")))?;
    let der = key
        .to_public_key_der()
        .map_err(|e| CertelError::Internal(format!("re-encoding public key: {e}")))?;
    Ok(hex::encode(sha256(der.as_bytes())))
}

fn decode_digest(hex_str: &str) -> Result<[u8; 32], CertelError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CertelError::MalformedPayload(format!("digest hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(CertelError::MalformedPayload(format!(
            "digest must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
