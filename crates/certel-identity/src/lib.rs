pub mod mock;
pub mod persona;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use certel_core::{CertelError, MAX_INQUIRY_AGE_SECS};

pub use mock::MockVerifier;
pub use persona::PersonaVerifier;

/// Outcome of one inquiry lookup at the external verification vendor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub verified: bool,
}

/// Adapter seam to the external identity-verification service.
///
/// Implementations return `Ok` with `verified: false` for a completed lookup
/// that fails policy (including vendor-side 4xx/5xx); transport failures are
/// [`CertelError::UpstreamFailure`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_identity(
        &self,
        inquiry_id: &str,
        expected_name: &str,
        expected_surname: &str,
    ) -> Result<VerificationResult, CertelError>;
}

/// The verification policy: accepted status, NFC-normalized case-sensitive
/// name equality, and an inquiry no older than `max_age_secs`.
pub fn policy_verified(
    status: &str,
    first_name: &str,
    last_name: &str,
    created_at: Option<DateTime<Utc>>,
    expected_name: &str,
    expected_surname: &str,
    now: DateTime<Utc>,
    max_age_secs: i64,
) -> bool {
    if !matches!(status, "completed" | "approved") {
        return false;
    }
    if !nfc_eq(first_name, expected_name) || !nfc_eq(last_name, expected_surname) {
        return false;
    }
    match created_at {
        Some(created) => now.timestamp() - created.timestamp() <= max_age_secs,
        None => false,
    }
}

fn nfc_eq(a: &str, b: &str) -> bool {
    a.nfc().eq(b.nfc())
}

/// Default policy horizon for inquiry age.
pub fn default_max_inquiry_age() -> i64 {
    MAX_INQUIRY_AGE_SECS
}
