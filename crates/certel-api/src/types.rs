use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use certel_core::CertelError;
use certel_p2p::PeerInfo;
use certel_state::CertRecord;

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitCertificationRequest {
    pub public_key: String,
    pub name: String,
    pub surname: String,
    pub inquiry_id: String,
    /// Defaults to the node's clock when omitted.
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub name: String,
    pub surname: String,
}

#[derive(Debug, Deserialize)]
pub struct AddPeerRequest {
    pub address: String,
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SubmitCertificationResponse {
    pub success: bool,
    pub transaction_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CertificationResponse {
    pub public_key: String,
    pub name: String,
    pub surname: String,
    pub inquiry_id: String,
    pub datetime: DateTime<Utc>,
    pub block_hash: String,
    pub height: u64,
}

impl From<CertRecord> for CertificationResponse {
    fn from(rec: CertRecord) -> Self {
        Self {
            public_key: rec.public_key,
            name: rec.name,
            surname: rec.surname,
            inquiry_id: rec.inquiry_id,
            datetime: rec.datetime,
            block_hash: rec.block_hash,
            height: rec.height,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PeerEntry {
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub advertised_height: Option<u64>,
    pub consecutive_failures: u32,
}

impl PeerEntry {
    pub fn from_info(address: String, info: PeerInfo) -> Self {
        Self {
            address,
            last_seen: info.last_seen,
            advertised_height: info.advertised_height,
            consecutive_failures: info.consecutive_failures,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PeerListResponse {
    pub peers: Vec<PeerEntry>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AddPeerResponse {
    pub success: bool,
    pub peer_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(rename = "networkFlag")]
    pub network_flag: String,
    pub blockchain: HealthBlockchain,
    pub network: HealthNetwork,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthBlockchain {
    pub height: u64,
    pub latest_hash: String,
}

#[derive(Debug, Serialize)]
pub struct HealthNetwork {
    pub peer_count: usize,
    pub network_id: String,
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// JSON error body returned by every failing mutation:
/// `{error, code, detail}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub detail: String,
}

/// [`CertelError`] carried to the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub CertelError);

impl From<CertelError> for ApiError {
    fn from(e: CertelError) -> Self {
        ApiError(e)
    }
}

fn classify(e: &CertelError) -> (StatusCode, &'static str) {
    match e {
        CertelError::MissingField(_) => (StatusCode::BAD_REQUEST, "MissingField"),
        CertelError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MalformedPayload"),
        CertelError::StaleTime => (StatusCode::BAD_REQUEST, "StaleTime"),
        CertelError::FutureTime => (StatusCode::BAD_REQUEST, "FutureTime"),
        CertelError::InvalidSignature => (StatusCode::BAD_REQUEST, "InvalidSignature"),
        CertelError::IdentityUnverified(_) => (StatusCode::BAD_REQUEST, "IdentityUnverified"),
        CertelError::DuplicateInquiry(_) => (StatusCode::CONFLICT, "DuplicateInquiry"),
        CertelError::DuplicateInPool(_) => (StatusCode::CONFLICT, "DuplicateInPool"),
        CertelError::NotFound => (StatusCode::NOT_FOUND, "NotFound"),
        CertelError::UpstreamFailure(_) => (StatusCode::BAD_GATEWAY, "UpstreamFailure"),
        CertelError::DuplicateBlock(_)
        | CertelError::InvalidBlock(_)
        | CertelError::InvalidProofOfWork
        | CertelError::Storage(_)
        | CertelError::Serialization(_)
        | CertelError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        // Absent query targets answer with an empty 404 body.
        if status == StatusCode::NOT_FOUND {
            return status.into_response();
        }
        let body = ErrorBody {
            error: code_message(code).to_string(),
            code,
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn code_message(code: &'static str) -> &'static str {
    match code {
        "MissingField" => "a required field is empty",
        "MalformedPayload" => "request payload could not be decoded",
        "StaleTime" => "datetime is outside the accepted window",
        "FutureTime" => "datetime is outside the accepted window",
        "InvalidSignature" => "signature verification failed",
        "IdentityUnverified" => "identity could not be verified",
        "DuplicateInquiry" => "inquiry already recorded",
        "DuplicateInPool" => "transaction already pending",
        "UpstreamFailure" => "verification service unavailable",
        _ => "internal error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_table() {
        let cases = [
            (CertelError::MissingField("name"), StatusCode::BAD_REQUEST),
            (CertelError::MalformedPayload("x".into()), StatusCode::BAD_REQUEST),
            (CertelError::StaleTime, StatusCode::BAD_REQUEST),
            (CertelError::FutureTime, StatusCode::BAD_REQUEST),
            (CertelError::InvalidSignature, StatusCode::BAD_REQUEST),
            (
                CertelError::IdentityUnverified("mismatch".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CertelError::DuplicateInquiry("inq".into()),
                StatusCode::CONFLICT,
            ),
            (
                CertelError::DuplicateInPool("id".into()),
                StatusCode::CONFLICT,
            ),
            (CertelError::NotFound, StatusCode::NOT_FOUND),
            (
                CertelError::UpstreamFailure("io".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CertelError::Internal("broken".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = classify(&err);
            assert_eq!(status, expected, "wrong status for {err:?}");
        }
    }

    #[test]
    fn submit_request_accepts_missing_datetime() {
        let json = r#"{
            "public_key": "PEM",
            "name": "Alice",
            "surname": "Doe",
            "inquiry_id": "inq-1",
            "signature": "c2ln"
        }"#;
        let req: SubmitCertificationRequest = serde_json::from_str(json).unwrap();
        assert!(req.datetime.is_none());
    }
}
