use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::sha2::{Digest, Sha256};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use certel_core::CertelError;

const DEFAULT_KEY_BITS: usize = 2048;

/// An RSA keypair in PEM form, as handed to clients by the keygen tool.
pub struct Keypair {
    /// PKCS#8 private key PEM.
    pub private_pem: String,
    /// SubjectPublicKeyInfo public key PEM.
    pub public_pem: String,
}

impl Keypair {
    pub fn generate(bits: usize) -> Result<Self, CertelError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CertelError::Internal(format!("generating RSA key: {e}")))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CertelError::Internal(format!("encoding private key: {e}")))?
            .to_string();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CertelError::Internal(format!("encoding public key: {e}")))?;

        Ok(Keypair {
            private_pem,
            public_pem,
        })
    }
}

pub fn generate_keypair_pem() -> Result<Keypair, CertelError> {
    Keypair::generate(DEFAULT_KEY_BITS)
}

/// Sign `message` with a PKCS#8 PEM private key. Returns the base64 signature
/// in the form clients submit.
pub fn sign_message(private_key_pem: &str, message: &[u8]) -> Result<String, CertelError> {
    let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| CertelError::MalformedPayload(format!("private key PEM: {e}")))?;
    let digest = Sha256::digest(message);
    let sig = key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CertelError::Internal(format!("signing: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(sig))
}

/// Verify a base64 PKCS#1 v1.5 signature over `message` against a PEM public
/// key. Malformed inputs surface as [`CertelError::MalformedPayload`]; a
/// well-formed but wrong signature as [`CertelError::InvalidSignature`].
pub fn verify_signature(
    public_key_pem: &str,
    message: &[u8],
    signature_base64: &str,
) -> Result<(), CertelError> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CertelError::MalformedPayload(format!("public key PEM: {e}")))?;
    let sig = base64::engine::general_purpose::STANDARD
        .decode(signature_base64)
        .map_err(|e| CertelError::MalformedPayload(format!("signature base64: {e}")))?;
    let digest = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &sig)
        .map_err(|_| CertelError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fingerprint;

    #[test]
    fn sign_verify_round_trip() {
        let kp = Keypair::generate(512).unwrap();
        let msg = b"pk|Alice|Doe|inq-1|1700000000";
        let sig = sign_message(&kp.private_pem, msg).unwrap();
        assert!(verify_signature(&kp.public_pem, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = Keypair::generate(512).unwrap();
        let sig = sign_message(&kp.private_pem, b"original").unwrap();
        assert!(matches!(
            verify_signature(&kp.public_pem, b"tampered", &sig),
            Err(CertelError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = Keypair::generate(512).unwrap();
        let kp2 = Keypair::generate(512).unwrap();
        let sig = sign_message(&kp1.private_pem, b"message").unwrap();
        assert!(matches!(
            verify_signature(&kp2.public_pem, b"message", &sig),
            Err(CertelError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_inputs_are_malformed_not_invalid() {
        let kp = Keypair::generate(512).unwrap();
        assert!(matches!(
            verify_signature("not a pem", b"m", "c2ln"),
            Err(CertelError::MalformedPayload(_))
        ));
        assert!(matches!(
            verify_signature(&kp.public_pem, b"m", "%%%"),
            Err(CertelError::MalformedPayload(_))
        ));
    }

    #[test]
    fn random_bytes_of_signature_length_are_invalid() {
        let kp = Keypair::generate(512).unwrap();
        let forged = base64::engine::general_purpose::STANDARD.encode([0x5au8; 64]);
        assert!(matches!(
            verify_signature(&kp.public_pem, b"m", &forged),
            Err(CertelError::InvalidSignature)
        ));
    }

    #[test]
    fn fingerprint_is_stable_per_key() {
        let kp = Keypair::generate(512).unwrap();
        let f1 = fingerprint(&kp.public_pem).unwrap();
        let f2 = fingerprint(&kp.public_pem).unwrap();
        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64);

        let other = Keypair::generate(512).unwrap();
        assert_ne!(f1, fingerprint(&other.public_pem).unwrap());
    }
}
