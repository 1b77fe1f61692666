use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use tracing::{debug, info, warn};

use certel_block::Block;
use certel_core::{Attestation, CertelError};

use crate::server::SharedState;
use crate::types::{
    AddPeerRequest, AddPeerResponse, ApiError, CertificationResponse, HealthBlockchain,
    HealthNetwork, HealthResponse, IdentityQuery, PeerEntry, PeerListResponse,
    SubmitCertificationRequest, SubmitCertificationResponse,
};

// ── Submission ────────────────────────────────────────────────────────────────

/// `POST /api/v1/certifications` (and the legacy `/api/certifications`).
///
/// decode → default datetime → static validation → signature → identity
/// verification → pool. The verifier is only consulted once the signature
/// holds, so forged submissions never reach it.
pub async fn submit_certification(
    State(state): State<SharedState>,
    Json(req): Json<SubmitCertificationRequest>,
) -> Result<Json<SubmitCertificationResponse>, ApiError> {
    let now = Utc::now();
    let tx = Attestation::build(
        req.public_key,
        req.name,
        req.surname,
        req.inquiry_id,
        req.datetime.unwrap_or(now),
        req.signature,
    );

    tx.validate_static(now)?;
    if state.require_signature {
        certel_crypto::verify_signature(&tx.public_key, &tx.canonical_message(), &tx.signature)?;
    }

    let verification = state
        .verifier
        .verify_identity(&tx.inquiry_id, &tx.name, &tx.surname)
        .await?;
    if !verification.verified {
        debug!(inquiry = %tx.inquiry_id, status = %verification.status, "identity rejected");
        return Err(CertelError::IdentityUnverified(format!(
            "verifier status {}",
            verification.status
        ))
        .into());
    }

    let transaction_id = state.chain.add_transaction(tx, now)?;
    info!(id = %transaction_id, "certification accepted into the pool");
    Ok(Json(SubmitCertificationResponse {
        success: true,
        transaction_id,
        message: "certification pending inclusion in a block".into(),
    }))
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// `GET /api/v1/certifications/by-public-key/{pk}` (pk percent-encoded PEM).
pub async fn certification_by_public_key(
    State(state): State<SharedState>,
    Path(public_key): Path<String>,
) -> Result<Json<CertificationResponse>, ApiError> {
    match state.chain.query_by_pk(&public_key)? {
        Some(rec) => Ok(Json(rec.into())),
        None => Err(CertelError::NotFound.into()),
    }
}

/// `GET /api/v1/certifications/by-identity?name=&surname=`.
pub async fn certification_by_identity(
    State(state): State<SharedState>,
    Query(query): Query<IdentityQuery>,
) -> Result<Json<CertificationResponse>, ApiError> {
    match state.chain.query_by_identity(&query.name, &query.surname)? {
        Some(rec) => Ok(Json(rec.into())),
        None => Err(CertelError::NotFound.into()),
    }
}

// ── Blocks ────────────────────────────────────────────────────────────────────

pub async fn list_blocks(State(state): State<SharedState>) -> Json<Vec<Block>> {
    Json(state.chain.all_blocks())
}

pub async fn latest_block(State(state): State<SharedState>) -> Json<Block> {
    Json(state.chain.tip())
}

pub async fn block_by_height(
    State(state): State<SharedState>,
    Path(height): Path<u64>,
) -> Result<Json<Block>, ApiError> {
    match state.chain.block_at(height) {
        Some(block) => Ok(Json(block)),
        None => Err(CertelError::NotFound.into()),
    }
}

// ── Peers ─────────────────────────────────────────────────────────────────────

/// `GET /api/v1/peers`: the structured table view.
pub async fn peers_v1(State(state): State<SharedState>) -> Json<PeerListResponse> {
    let peers: Vec<PeerEntry> = state
        .peers
        .snapshot()
        .into_iter()
        .map(|(addr, info)| PeerEntry::from_info(addr, info))
        .collect();
    let count = peers.len();
    Json(PeerListResponse { peers, count })
}

/// Legacy `GET /peers`: a bare array of `host:port` strings.
pub async fn peers_legacy(State(state): State<SharedState>) -> Json<Vec<String>> {
    Json(state.peers.addresses())
}

/// `POST /api/v1/peers`: admit one address and kick off cascade discovery in
/// the background (single-flight; concurrent triggers coalesce).
pub async fn add_peer(
    State(state): State<SharedState>,
    Json(req): Json<AddPeerRequest>,
) -> Result<Json<AddPeerResponse>, ApiError> {
    if certel_p2p::PeerManager::parse_address(&req.address).is_none() {
        return Err(
            CertelError::MalformedPayload(format!("not a host:port address: {}", req.address))
                .into(),
        );
    }
    let added = state.peers.add_peer(&req.address);
    if added {
        let cascade = state.cascade.clone();
        tokio::spawn(async move {
            let outcome = cascade.run_once().await;
            debug!(?outcome, "cascade after peer add");
        });
    } else {
        warn!(address = %req.address, "peer not added (duplicate or self)");
    }
    Ok(Json(AddPeerResponse {
        success: true,
        peer_count: state.peers.len(),
    }))
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    let latest_hash = state.chain.tip_hash()?;
    Ok(Json(HealthResponse {
        status: "ok",
        network_flag: state.network_flag.clone(),
        blockchain: HealthBlockchain {
            height: state.chain.height(),
            latest_hash,
        },
        network: HealthNetwork {
            peer_count: state.peers.len(),
            network_id: state.network_id.clone(),
        },
        timestamp: Utc::now(),
    }))
}
