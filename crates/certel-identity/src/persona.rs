use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use certel_core::{CertelError, VERIFIER_TIMEOUT_SECS};

use crate::{policy_verified, IdentityVerifier, VerificationResult};

/// Live adapter to the hosted inquiry endpoint: authenticated
/// `GET {base_url}/inquiries/{id}` with a bearer token.
///
/// Vendor-side HTTP errors (4xx/5xx) surface as an unverified result;
/// transport failures and timeouts as [`CertelError::UpstreamFailure`].
pub struct PersonaVerifier {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_inquiry_age_secs: i64,
}

// Wire shape: data.attributes.{status, created_at, fields.{name_first, name_last}}.

#[derive(Debug, Deserialize)]
struct InquiryResponse {
    data: InquiryData,
}

#[derive(Debug, Deserialize)]
struct InquiryData {
    attributes: InquiryAttributes,
}

#[derive(Debug, Deserialize)]
struct InquiryAttributes {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "created_at")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    fields: Option<InquiryFields>,
}

#[derive(Debug, Deserialize)]
struct InquiryFields {
    #[serde(default)]
    name_first: Option<String>,
    #[serde(default)]
    name_last: Option<String>,
}

impl PersonaVerifier {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        max_inquiry_age_secs: i64,
    ) -> Result<Self, CertelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(VERIFIER_TIMEOUT_SECS))
            .build()
            .map_err(|e| CertelError::Internal(format!("building verifier client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
            max_inquiry_age_secs,
        })
    }

    fn endpoint(&self, inquiry_id: &str) -> String {
        format!(
            "{}/inquiries/{}",
            self.base_url.trim_end_matches('/'),
            inquiry_id
        )
    }
}

#[async_trait]
impl IdentityVerifier for PersonaVerifier {
    async fn verify_identity(
        &self,
        inquiry_id: &str,
        expected_name: &str,
        expected_surname: &str,
    ) -> Result<VerificationResult, CertelError> {
        let url = self.endpoint(inquiry_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CertelError::UpstreamFailure(format!("GET {url}: {e}")))?;

        let status_code = resp.status();
        if !status_code.is_success() {
            warn!(inquiry = inquiry_id, status = %status_code, "verifier returned HTTP error");
            return Ok(VerificationResult {
                status: format!("http_{}", status_code.as_u16()),
                first_name: String::new(),
                last_name: String::new(),
                created_at: None,
                verified: false,
            });
        }

        let body: InquiryResponse = resp
            .json()
            .await
            .map_err(|e| CertelError::UpstreamFailure(format!("decoding inquiry response: {e}")))?;

        let attrs = body.data.attributes;
        let status = attrs.status.unwrap_or_default();
        let (first_name, last_name) = match attrs.fields {
            Some(f) => (
                f.name_first.unwrap_or_default(),
                f.name_last.unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };

        let verified = policy_verified(
            &status,
            &first_name,
            &last_name,
            attrs.created_at,
            expected_name,
            expected_surname,
            Utc::now(),
            self.max_inquiry_age_secs,
        );
        debug!(inquiry = inquiry_id, status = %status, verified, "inquiry checked");

        Ok(VerificationResult {
            status,
            first_name,
            last_name,
            created_at: attrs.created_at,
            verified,
        })
    }
}
