use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use certel_core::CertelError;

use crate::{policy_verified, IdentityVerifier, VerificationResult, default_max_inquiry_age};

/// One seeded inquiry the mock will answer for.
#[derive(Clone, Debug)]
pub struct MockInquiry {
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory verifier for tests and mock deployments. Deterministic across
/// runs: answers come only from the seeded map.
#[derive(Default)]
pub struct MockVerifier {
    inquiries: Mutex<HashMap<String, MockInquiry>>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, inquiry_id: impl Into<String>, inquiry: MockInquiry) {
        self.inquiries
            .lock()
            .expect("mock verifier lock poisoned")
            .insert(inquiry_id.into(), inquiry);
    }

    /// Seed a completed inquiry created now, the common test fixture.
    pub fn insert_completed(
        &self,
        inquiry_id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) {
        self.insert(
            inquiry_id,
            MockInquiry {
                status: "completed".into(),
                first_name: first_name.into(),
                last_name: last_name.into(),
                created_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl IdentityVerifier for MockVerifier {
    async fn verify_identity(
        &self,
        inquiry_id: &str,
        expected_name: &str,
        expected_surname: &str,
    ) -> Result<VerificationResult, CertelError> {
        let entry = {
            let map = self.inquiries.lock().expect("mock verifier lock poisoned");
            map.get(inquiry_id).cloned()
        };

        let Some(inq) = entry else {
            return Ok(VerificationResult {
                status: "not_found".into(),
                first_name: String::new(),
                last_name: String::new(),
                created_at: None,
                verified: false,
            });
        };

        let verified = policy_verified(
            &inq.status,
            &inq.first_name,
            &inq.last_name,
            Some(inq.created_at),
            expected_name,
            expected_surname,
            Utc::now(),
            default_max_inquiry_age(),
        );

        Ok(VerificationResult {
            status: inq.status,
            first_name: inq.first_name,
            last_name: inq.last_name,
            created_at: Some(inq.created_at),
            verified,
        })
    }
}
