use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{
    GENESIS_INQUIRY, GENESIS_NAME, GENESIS_PUBLIC_KEY, GENESIS_SURNAME, TX_MAX_AGE_SECS,
    TX_MAX_FUTURE_SECS,
};
use crate::error::CertelError;

// ── AttestationStatus ─────────────────────────────────────────────────────────

/// Lifecycle of an attestation: pooled, included in a mined block, or aged out
/// of the query indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationStatus {
    Pending,
    Mined,
    Expired,
}

impl AttestationStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            AttestationStatus::Pending => 0,
            AttestationStatus::Mined => 1,
            AttestationStatus::Expired => 2,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, CertelError> {
        match b {
            0 => Ok(AttestationStatus::Pending),
            1 => Ok(AttestationStatus::Mined),
            2 => Ok(AttestationStatus::Expired),
            other => Err(CertelError::MalformedPayload(format!(
                "unknown status byte {other}"
            ))),
        }
    }
}

// ── Attestation ───────────────────────────────────────────────────────────────

/// A signed record binding an RSA public key to a verified human identity.
///
/// `id` is SHA-256 over the canonical message and is always recomputed, never
/// trusted from the wire. `signature` is the base64 PKCS#1 v1.5 signature of
/// the canonical message under the key in `public_key`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// PEM-encoded SubjectPublicKeyInfo.
    pub public_key: String,
    pub name: String,
    pub surname: String,
    /// Opaque token issued by the external identity verifier. Acts as a
    /// globally unique replay nonce across the chain.
    pub inquiry_id: String,
    /// UTC instant, truncated to whole seconds.
    pub datetime: DateTime<Utc>,
    /// Base64 signature over [`Attestation::canonical_message`].
    pub signature: String,
    pub status: AttestationStatus,
    /// Lowercase-hex SHA-256 of the canonical message.
    pub id: String,
}

impl Attestation {
    /// Assemble a record, truncating `datetime` to second resolution and
    /// computing `id` from the canonical fields.
    pub fn build(
        public_key: impl Into<String>,
        name: impl Into<String>,
        surname: impl Into<String>,
        inquiry_id: impl Into<String>,
        datetime: DateTime<Utc>,
        signature: impl Into<String>,
    ) -> Self {
        let mut tx = Attestation {
            public_key: public_key.into(),
            name: name.into(),
            surname: surname.into(),
            inquiry_id: inquiry_id.into(),
            datetime: truncate_to_seconds(datetime),
            signature: signature.into(),
            status: AttestationStatus::Pending,
            id: String::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// The signable form: `public_key|name|surname|inquiry_id|unix_seconds`.
    pub fn canonical_message(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            self.public_key,
            self.name,
            self.surname,
            self.inquiry_id,
            self.datetime.timestamp()
        )
        .into_bytes()
    }

    /// Deterministic identifier: lowercase-hex SHA-256 of the canonical message.
    pub fn compute_id(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_message()))
    }

    /// The sentinel record carried by block 0. Exempt from signature
    /// verification, and only from that.
    pub fn is_genesis_sentinel(&self) -> bool {
        self.public_key == GENESIS_PUBLIC_KEY
            && self.name == GENESIS_NAME
            && self.surname == GENESIS_SURNAME
            && self.inquiry_id == GENESIS_INQUIRY
            && self.signature.is_empty()
    }

    /// Shape checks that hold for the life of the record: non-empty fields,
    /// well-formed base64 signature, PEM framing on the key.
    pub fn validate_shape(&self) -> Result<(), CertelError> {
        if self.public_key.is_empty() {
            return Err(CertelError::MissingField("public_key"));
        }
        if self.name.is_empty() {
            return Err(CertelError::MissingField("name"));
        }
        if self.surname.is_empty() {
            return Err(CertelError::MissingField("surname"));
        }
        if self.inquiry_id.is_empty() {
            return Err(CertelError::MissingField("inquiry_id"));
        }
        if self.is_genesis_sentinel() {
            return Ok(());
        }
        if self.signature.is_empty() {
            return Err(CertelError::MissingField("signature"));
        }
        base64::engine::general_purpose::STANDARD
            .decode(&self.signature)
            .map_err(|e| CertelError::MalformedPayload(format!("signature base64: {e}")))?;
        if !self.public_key.contains("-----BEGIN PUBLIC KEY-----")
            || !self.public_key.contains("-----END PUBLIC KEY-----")
        {
            return Err(CertelError::MalformedPayload(
                "public_key is not PEM-framed".into(),
            ));
        }
        Ok(())
    }

    /// Submission-time validation: shape checks plus the clock window
    /// [now − 24h, now + 5min], both bounds inclusive.
    pub fn validate_static(&self, now: DateTime<Utc>) -> Result<(), CertelError> {
        self.validate_shape()?;
        let ts = self.datetime.timestamp();
        if ts < now.timestamp() - TX_MAX_AGE_SECS {
            return Err(CertelError::StaleTime);
        }
        if ts > now.timestamp() + TX_MAX_FUTURE_SECS {
            return Err(CertelError::FutureTime);
        }
        Ok(())
    }

    // ── Binary wire form ──────────────────────────────────────────────────────

    /// Length-prefixed strings, then the big-endian i64 timestamp and one
    /// status byte. Stable across implementations; `id` stays off the wire.
    pub fn encode(&self, out: &mut Vec<u8>) {
        for s in [
            &self.public_key,
            &self.name,
            &self.surname,
            &self.inquiry_id,
            &self.signature,
        ] {
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        out.extend_from_slice(&self.datetime.timestamp().to_be_bytes());
        out.push(self.status.as_byte());
    }

    /// Decode one record starting at `*pos`, advancing `*pos` past it.
    pub fn decode(input: &[u8], pos: &mut usize) -> Result<Self, CertelError> {
        let public_key = read_string(input, pos)?;
        let name = read_string(input, pos)?;
        let surname = read_string(input, pos)?;
        let inquiry_id = read_string(input, pos)?;
        let signature = read_string(input, pos)?;
        let secs = i64::from_be_bytes(read_array::<8>(input, pos)?);
        let status = AttestationStatus::from_byte(read_array::<1>(input, pos)?[0])?;
        let datetime = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| CertelError::MalformedPayload(format!("timestamp {secs}")))?;

        let mut tx = Attestation {
            public_key,
            name,
            surname,
            inquiry_id,
            datetime,
            signature,
            status,
            id: String::new(),
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }
}

/// Drop sub-second precision; the wire carries whole seconds only.
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.timestamp(), 0)
        .expect("whole-second timestamp is always representable")
}

fn read_array<const N: usize>(input: &[u8], pos: &mut usize) -> Result<[u8; N], CertelError> {
    let end = pos
        .checked_add(N)
        .filter(|&e| e <= input.len())
        .ok_or_else(|| CertelError::MalformedPayload("truncated record".into()))?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&input[*pos..end]);
    *pos = end;
    Ok(arr)
}

fn read_string(input: &[u8], pos: &mut usize) -> Result<String, CertelError> {
    let len = u32::from_be_bytes(read_array::<4>(input, pos)?) as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= input.len())
        .ok_or_else(|| CertelError::MalformedPayload("truncated string".into()))?;
    let s = std::str::from_utf8(&input[*pos..end])
        .map_err(|e| CertelError::MalformedPayload(format!("non-utf8 string: {e}")))?
        .to_string();
    *pos = end;
    Ok(s)
}

/// The sentinel transaction carried by block 0.
pub fn genesis_attestation() -> Attestation {
    Attestation::build(
        GENESIS_PUBLIC_KEY,
        GENESIS_NAME,
        GENESIS_SURNAME,
        GENESIS_INQUIRY,
        DateTime::from_timestamp(crate::constants::GENESIS_TIMESTAMP, 0)
            .expect("genesis timestamp is representable"),
        "",
    )
}
