pub mod cascade;
pub mod config;
pub mod peers;
pub mod seed;
pub mod sync;
pub mod udp;

pub use cascade::{CascadeDiscovery, CascadeOutcome};
pub use config::P2pConfig;
pub use peers::{PeerInfo, PeerManager};
pub use seed::load_seed_file;
pub use sync::Synchronizer;
pub use udp::DiscoveryService;
