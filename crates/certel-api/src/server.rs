use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use certel_core::CertelError;
use certel_identity::IdentityVerifier;
use certel_p2p::{CascadeDiscovery, PeerManager};
use certel_state::ChainManager;

use crate::handlers;

/// Everything the HTTP handlers need, shared via axum state.
pub struct ApiContext {
    pub chain: Arc<ChainManager>,
    pub peers: Arc<PeerManager>,
    pub cascade: Arc<CascadeDiscovery>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub network_id: String,
    pub network_flag: String,
    pub require_signature: bool,
}

pub type SharedState = Arc<ApiContext>;

/// The REST router. CORS is permissive: this is a public query surface.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/certifications", post(handlers::submit_certification))
        .route("/api/certifications", post(handlers::submit_certification))
        .route(
            "/api/v1/certifications/by-public-key/{pk}",
            get(handlers::certification_by_public_key),
        )
        .route(
            "/api/v1/certifications/by-identity",
            get(handlers::certification_by_identity),
        )
        .route("/api/v1/blocks", get(handlers::list_blocks))
        .route("/api/v1/blocks/latest", get(handlers::latest_block))
        .route("/api/v1/blocks/{height}", get(handlers::block_by_height))
        .route(
            "/api/v1/peers",
            get(handlers::peers_v1).post(handlers::add_peer),
        )
        .route("/peers", get(handlers::peers_legacy))
        .route("/api/v1/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Serve until cancellation; in-flight requests drain before return.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    cancel: CancellationToken,
) -> Result<(), CertelError> {
    let addr = listener
        .local_addr()
        .map_err(|e| CertelError::Internal(format!("reading listener address: {e}")))?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| CertelError::Internal(format!("HTTP server: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use certel_crypto::{sign_message, Keypair};
    use certel_identity::MockVerifier;
    use certel_p2p::P2pConfig;
    use certel_state::{ChainSettings, Store};
    use chrono::Utc;
    use std::time::Duration;

    struct TestNode {
        _dir: tempfile::TempDir,
        pub base: String,
        pub chain: Arc<ChainManager>,
        pub mock: Arc<MockVerifier>,
        cancel: CancellationToken,
    }

    impl Drop for TestNode {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn spawn_node(flag: &str) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let settings = ChainSettings {
            initial_bits: 1,
            min_bits: 1,
            mining_tick: Duration::from_millis(50),
            ..ChainSettings::default()
        };
        let chain = Arc::new(ChainManager::open(store, settings).unwrap());

        let p2p_cfg = P2pConfig {
            flag: flag.into(),
            network_id: "testnet".into(),
            ..P2pConfig::default()
        };
        let peers = Arc::new(PeerManager::new(p2p_cfg.clone()));
        let cascade = Arc::new(CascadeDiscovery::new(p2p_cfg, Arc::clone(&peers)).unwrap());
        let mock = Arc::new(MockVerifier::new());

        let state: SharedState = Arc::new(ApiContext {
            chain: Arc::clone(&chain),
            peers,
            cascade,
            verifier: mock.clone() as Arc<dyn IdentityVerifier>,
            network_id: "testnet".into(),
            network_flag: flag.into(),
            require_signature: true,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, state, cancel.clone()));

        TestNode {
            _dir: dir,
            base,
            chain,
            mock,
            cancel,
        }
    }

    fn signed_payload(kp: &Keypair, name: &str, surname: &str, inquiry: &str) -> serde_json::Value {
        let unsigned = certel_core::Attestation::build(
            kp.public_pem.clone(),
            name,
            surname,
            inquiry,
            Utc::now(),
            "",
        );
        let sig = sign_message(&kp.private_pem, &unsigned.canonical_message()).unwrap();
        serde_json::json!({
            "public_key": kp.public_pem,
            "name": name,
            "surname": surname,
            "inquiry_id": inquiry,
            "datetime": unsigned.datetime,
            "signature": sig,
        })
    }

    #[tokio::test]
    async fn health_reports_chain_and_flag() {
        let node = spawn_node("flag-x").await;
        let http = reqwest::Client::new();
        let body: serde_json::Value = http
            .get(format!("{}/api/v1/health", node.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["networkFlag"], "flag-x");
        assert_eq!(body["blockchain"]["height"], 0);
        assert_eq!(body["network"]["network_id"], "testnet");
    }

    #[tokio::test]
    async fn submit_verifies_then_pools() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        node.mock.insert_completed("inq-1", "Alice", "Doe");

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/v1/certifications", node.base))
            .json(&signed_payload(&kp, "Alice", "Doe", "inq-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["transaction_id"].as_str().unwrap().len(), 64);
        assert_eq!(node.chain.mempool_len(), 1);
    }

    #[tokio::test]
    async fn identity_mismatch_is_rejected_without_pooling() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        // Verifier knows the inquiry under a different surname.
        node.mock.insert_completed("inq-1", "Alice", "Doe");

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/v1/certifications", node.base))
            .json(&signed_payload(&kp, "Alice", "Smith", "inq-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "IdentityUnverified");
        assert_eq!(node.chain.mempool_len(), 0);
    }

    #[tokio::test]
    async fn forged_signature_never_reaches_verifier() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        // Note: the verifier is NOT seeded; reaching it would still fail,
        // but the error code proves rejection happened at the signature stage.
        let mut payload = signed_payload(&kp, "Alice", "Doe", "inq-1");
        payload["signature"] = serde_json::Value::String("AAAA".repeat(16));

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/v1/certifications", node.base))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "InvalidSignature");
    }

    #[tokio::test]
    async fn legacy_submission_route_is_aliased() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        node.mock.insert_completed("inq-legacy", "Alice", "Doe");

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/certifications", node.base))
            .json(&signed_payload(&kp, "Alice", "Doe", "inq-legacy"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn query_routes_round_trip_after_mining() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        node.mock.insert_completed("inq-1", "Alice", "Doe");

        let http = reqwest::Client::new();
        http.post(format!("{}/api/v1/certifications", node.base))
            .json(&signed_payload(&kp, "Alice", "Doe", "inq-1"))
            .send()
            .await
            .unwrap();
        node.chain
            .mine_once(&CancellationToken::new())
            .unwrap()
            .unwrap();

        // by-identity
        let rec: serde_json::Value = http
            .get(format!(
                "{}/api/v1/certifications/by-identity?name=Alice&surname=Doe",
                node.base
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rec["height"], 1);
        assert_eq!(rec["inquiry_id"], "inq-1");

        // by-public-key, PEM percent-encoded as one path segment
        let mut url = reqwest::Url::parse(&node.base).unwrap();
        url.path_segments_mut().unwrap().pop_if_empty().extend([
            "api",
            "v1",
            "certifications",
            "by-public-key",
            kp.public_pem.as_str(),
        ]);
        let resp = http.get(url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let rec: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(rec["inquiry_id"], "inq-1");

        // blocks
        let latest: serde_json::Value = http
            .get(format!("{}/api/v1/blocks/latest", node.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(latest["header"]["height"], 1);
        let all: serde_json::Value = http
            .get(format!("{}/api/v1/blocks", node.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);

        // absent query target: empty 404
        let resp = http
            .get(format!(
                "{}/api/v1/certifications/by-identity?name=No&surname=Body",
                node.base
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert!(resp.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_routes_expose_both_shapes() {
        let node = spawn_node("flag-x").await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{}/api/v1/peers", node.base))
            .json(&serde_json::json!({"address": "10.1.2.3:8333"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let structured: serde_json::Value = http
            .get(format!("{}/api/v1/peers", node.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(structured["count"], 1);
        assert_eq!(structured["peers"][0]["address"], "10.1.2.3:8333");

        let legacy: Vec<String> = http
            .get(format!("{}/peers", node.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(legacy, vec!["10.1.2.3:8333".to_string()]);

        let resp = http
            .post(format!("{}/api/v1/peers", node.base))
            .json(&serde_json::json!({"address": "not an address"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn duplicate_inquiry_conflicts_and_leaves_state_alone() {
        let node = spawn_node("flag-x").await;
        let kp = Keypair::generate(512).unwrap();
        node.mock.insert_completed("inq-1", "Alice", "Doe");
        let payload = signed_payload(&kp, "Alice", "Doe", "inq-1");

        let http = reqwest::Client::new();
        http.post(format!("{}/api/v1/certifications", node.base))
            .json(&payload)
            .send()
            .await
            .unwrap();
        node.chain
            .mine_once(&CancellationToken::new())
            .unwrap()
            .unwrap();

        let resp = http
            .post(format!("{}/api/v1/certifications", node.base))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "DuplicateInquiry");
        assert_eq!(node.chain.mempool_len(), 0);
        assert_eq!(node.chain.height(), 1);
    }
}
