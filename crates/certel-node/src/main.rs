//! certel-node: the Certel registry full-node binary.
//!
//! Startup sequence:
//!   1. Load and validate the YAML configuration
//!   2. Open (or initialise) the sled store; create genesis if fresh
//!   3. Bind the HTTP listener and the UDP discovery socket
//!   4. Seed the peer table (trusted nodes + seed file)
//!   5. Spawn the subsystem tasks: HTTP API, UDP discovery, peer
//!      maintenance, mining ticker, synchronizer, index-expiry sweeper
//!   6. Wait for ctrl-c, cancel the root token, drain with a 5 s grace

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certel_api::{serve, ApiContext};
use certel_identity::{IdentityVerifier, MockVerifier, PersonaVerifier};
use certel_p2p::{
    load_seed_file, CascadeDiscovery, DiscoveryService, P2pConfig, PeerManager, Synchronizer,
};
use certel_state::{ChainManager, ChainSettings, Store};

use config::NodeConfig;

const EXIT_CONFIG: u8 = 1;
const EXIT_STORAGE: u8 = 2;
const EXIT_NETWORK: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "certel-node",
    version,
    about = "Certel node, a peer-to-peer certification registry"
)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override network.port from the configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Override storage.data_dir from the configuration.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug {
        "debug"
    } else {
        "info,certel=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.parse().expect("static filter parses")),
        )
        .init();

    info!("Certel node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut cfg = match NodeConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration unreadable");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(port) = args.port {
        cfg.network.port = port;
    }
    if let Some(data) = args.data {
        cfg.storage.data_dir = data;
    }
    if let Err(e) = cfg.validate() {
        error!(error = %e, "configuration invalid");
        return ExitCode::from(EXIT_CONFIG);
    }

    // ── Storage and chain ─────────────────────────────────────────────────────
    if let Err(e) = std::fs::create_dir_all(&cfg.storage.data_dir) {
        error!(error = %e, dir = %cfg.storage.data_dir.display(), "creating data dir failed");
        return ExitCode::from(EXIT_STORAGE);
    }
    let store = match Store::open(&cfg.storage.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "opening store failed");
            return ExitCode::from(EXIT_STORAGE);
        }
    };

    let settings = ChainSettings {
        initial_bits: cfg.mining.initial_difficulty,
        retarget_window: cfg.mining.difficulty_adjust,
        target_block_time: cfg.blockchain.block_time.as_secs() as i64,
        max_tx_per_block: cfg.mining.max_trans_per_block,
        require_signature: cfg.security.require_signature,
        ..ChainSettings::default()
    };
    let chain = match ChainManager::open(Arc::clone(&store), settings) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            error!(error = %e, "opening chain failed");
            return ExitCode::from(EXIT_STORAGE);
        }
    };

    // ── Network binds ─────────────────────────────────────────────────────────
    let listener = match TcpListener::bind((cfg.network.host.as_str(), cfg.network.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = cfg.network.port, "binding HTTP port failed");
            return ExitCode::from(EXIT_NETWORK);
        }
    };

    let p2p_cfg = P2pConfig {
        host: cfg.network.host.clone(),
        api_port: cfg.network.port,
        discovery_port: cfg.network.discovery_port,
        flag: cfg.network.flag.clone(),
        network_id: cfg.network.network_id.clone(),
        ..P2pConfig::default()
    };
    let peers = Arc::new(PeerManager::new(p2p_cfg.clone()));

    let discovery = match DiscoveryService::bind(p2p_cfg.clone(), Arc::clone(&peers)).await {
        Ok(discovery) => discovery,
        Err(e) => {
            error!(error = %e, port = cfg.network.discovery_port, "binding UDP port failed");
            return ExitCode::from(EXIT_NETWORK);
        }
    };

    // ── Peer seeding ──────────────────────────────────────────────────────────
    for addr in &cfg.network.trusted_nodes {
        peers.add_peer(addr);
    }
    if cfg.network.seed_file.exists() {
        match load_seed_file(&cfg.network.seed_file) {
            Ok(seeds) => {
                for addr in seeds {
                    peers.add_peer(&addr);
                }
            }
            Err(e) => warn!(error = %e, "seed file unreadable"),
        }
    }
    info!(peers = peers.len(), "peer table seeded");

    // ── Verifier ──────────────────────────────────────────────────────────────
    let verifier: Arc<dyn IdentityVerifier> = if cfg.api.mock_verifier {
        warn!("using the mock identity verifier; submissions verify against an empty map");
        Arc::new(MockVerifier::new())
    } else {
        match PersonaVerifier::new(
            cfg.api.persona_base_url.clone(),
            cfg.api.persona_api_key.clone(),
            cfg.security.max_inquiry_age.as_secs() as i64,
        ) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                error!(error = %e, "building identity verifier failed");
                return ExitCode::from(EXIT_CONFIG);
            }
        }
    };

    // ── Subsystems ────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();

    let cascade = match CascadeDiscovery::new(p2p_cfg.clone(), Arc::clone(&peers)) {
        Ok(cascade) => Arc::new(cascade),
        Err(e) => {
            error!(error = %e, "building cascade discovery failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let synchronizer = match Synchronizer::new(p2p_cfg, Arc::clone(&peers), Arc::clone(&chain)) {
        Ok(sync) => Arc::new(sync),
        Err(e) => {
            error!(error = %e, "building synchronizer failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let api_state = Arc::new(ApiContext {
        chain: Arc::clone(&chain),
        peers: Arc::clone(&peers),
        cascade: Arc::clone(&cascade),
        verifier,
        network_id: cfg.network.network_id.clone(),
        network_flag: cfg.network.flag.clone(),
        require_signature: cfg.security.require_signature,
    });

    let http_task = tokio::spawn(serve(listener, api_state, cancel.clone()));
    tokio::spawn(discovery.run(cancel.clone()));
    tokio::spawn(Arc::clone(&peers).maintenance_loop(cancel.clone()));
    tokio::spawn(Arc::clone(&chain).mining_loop(cancel.clone()));
    tokio::spawn(Arc::clone(&synchronizer).run(cancel.clone()));
    tokio::spawn(expiry_sweeper(
        Arc::clone(&chain),
        cfg.blockchain.cert_expiry,
        cancel.clone(),
    ));

    // Walk the peer graph once at startup so a seeded node fills its table.
    {
        let cascade = Arc::clone(&cascade);
        tokio::spawn(async move {
            let outcome = cascade.run_once().await;
            info!(?outcome, "startup cascade discovery");
        });
    }

    info!("node ready");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "waiting for shutdown signal failed");
    }
    info!("shutdown signal received");
    cancel.cancel();

    // HTTP drains in-flight requests; bound the wait to the 5 s grace.
    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server exited with error"),
        Ok(Err(e)) => warn!(error = %e, "HTTP task join failed"),
        Err(_) => warn!("HTTP server did not drain within the grace period"),
    }

    if let Err(e) = store.flush() {
        warn!(error = %e, "final store flush failed");
    }
    info!("node stopped");
    ExitCode::SUCCESS
}

/// Periodic cache-hygiene sweep of the cert indexes (never the chain).
async fn expiry_sweeper(
    chain: Arc<ChainManager>,
    cert_expiry: Duration,
    cancel: CancellationToken,
) {
    let tick = cert_expiry.min(Duration::from_secs(3600)).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(cert_expiry).unwrap_or(chrono::Duration::hours(8760));
        match chain.expire_certs(cutoff) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "expired cert index rows"),
            Err(e) => warn!(error = %e, "cert expiry sweep failed"),
        }
    }
}
