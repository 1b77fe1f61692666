use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertelError {
    // ── Transaction errors ───────────────────────────────────────────────────
    #[error("required field is empty: {0}")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("datetime is more than 24 hours in the past")]
    StaleTime,

    #[error("datetime is more than 5 minutes in the future")]
    FutureTime,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("identity not verified: {0}")]
    IdentityUnverified(String),

    #[error("inquiry already recorded: {0}")]
    DuplicateInquiry(String),

    #[error("transaction already pooled: {0}")]
    DuplicateInPool(String),

    // ── Block / chain errors ─────────────────────────────────────────────────
    #[error("block already accepted: {0}")]
    DuplicateBlock(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("proof-of-work does not meet the target")]
    InvalidProofOfWork,

    // ── Lookup / I/O ─────────────────────────────────────────────────────────
    #[error("not found")]
    NotFound,

    #[error("verification service failure: {0}")]
    UpstreamFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}
