//! YAML node configuration.
//!
//! Sections mirror the deployment surface: `network`, `blockchain`,
//! `storage`, `api`, `mining`, `security`. Every key has a default; a handful
//! are validated as fatal before startup (exit code 1).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use certel_core::{
    CertelError, CERT_EXPIRY_SECS, DEFAULT_API_PORT, DEFAULT_DISCOVERY_PORT, INITIAL_BITS,
    MAX_BITS, MAX_INQUIRY_AGE_SECS, MAX_TX_PER_BLOCK, RETARGET_WINDOW, TARGET_BLOCK_TIME_SECS,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub blockchain: BlockchainSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub mining: MiningSection,
    #[serde(default)]
    pub security: SecuritySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Opaque string echoed in responses.
    #[serde(default)]
    pub network_id: String,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// UDP admission token. Required.
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub trusted_nodes: Vec<String>,
    /// Seed list path; loaded when present.
    #[serde(default = "default_seed_file")]
    pub seed_file: PathBuf,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            network_id: String::new(),
            discovery_port: default_discovery_port(),
            flag: String::new(),
            trusted_nodes: Vec::new(),
            seed_file: default_seed_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainSection {
    #[serde(default = "default_block_time", with = "humantime_serde")]
    pub block_time: Duration,
    #[serde(default = "default_cert_expiry", with = "humantime_serde")]
    pub cert_expiry: Duration,
}

impl Default for BlockchainSection {
    fn default() -> Self {
        Self {
            block_time: default_block_time(),
            cert_expiry: default_cert_expiry(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_persona_base_url")]
    pub persona_base_url: String,
    #[serde(default)]
    pub persona_api_key: String,
    /// Swap in the in-memory verifier; for tests and closed networks.
    #[serde(default)]
    pub mock_verifier: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            persona_base_url: default_persona_base_url(),
            persona_api_key: String::new(),
            mock_verifier: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningSection {
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u32,
    #[serde(default = "default_difficulty_adjust")]
    pub difficulty_adjust: u64,
    #[serde(default = "default_max_trans_per_block")]
    pub max_trans_per_block: usize,
}

impl Default for MiningSection {
    fn default() -> Self {
        Self {
            initial_difficulty: default_initial_difficulty(),
            difficulty_adjust: default_difficulty_adjust(),
            max_trans_per_block: default_max_trans_per_block(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySection {
    #[serde(default = "default_require_signature")]
    pub require_signature: bool,
    #[serde(default = "default_max_inquiry_age", with = "humantime_serde")]
    pub max_inquiry_age: Duration,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            require_signature: default_require_signature(),
            max_inquiry_age: default_max_inquiry_age(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_seed_file() -> PathBuf {
    PathBuf::from("nodes_ip.txt")
}
fn default_block_time() -> Duration {
    Duration::from_secs(TARGET_BLOCK_TIME_SECS as u64)
}
fn default_cert_expiry() -> Duration {
    Duration::from_secs(CERT_EXPIRY_SECS as u64)
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_persona_base_url() -> String {
    "https://withpersona.com/api/v1".into()
}
fn default_initial_difficulty() -> u32 {
    INITIAL_BITS
}
fn default_difficulty_adjust() -> u64 {
    RETARGET_WINDOW
}
fn default_max_trans_per_block() -> usize {
    MAX_TX_PER_BLOCK
}
fn default_require_signature() -> bool {
    true
}
fn default_max_inquiry_age() -> Duration {
    Duration::from_secs(MAX_INQUIRY_AGE_SECS as u64)
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, CertelError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CertelError::MalformedPayload(format!("reading config {}: {e}", path.display()))
        })?;
        let config: NodeConfig = serde_yaml::from_str(&text)
            .map_err(|e| CertelError::MalformedPayload(format!("parsing config: {e}")))?;
        Ok(config)
    }

    /// Fatal configuration checks; failures abort startup with exit code 1.
    pub fn validate(&self) -> Result<(), CertelError> {
        if self.network.port == 0 {
            return Err(CertelError::MalformedPayload("network.port must be non-zero".into()));
        }
        if self.network.discovery_port == 0 {
            return Err(CertelError::MalformedPayload(
                "network.discovery_port must be non-zero".into(),
            ));
        }
        if self.network.network_id.is_empty() {
            return Err(CertelError::MissingField("network.network_id"));
        }
        if self.network.flag.is_empty() {
            return Err(CertelError::MissingField("network.flag"));
        }
        if self.mining.initial_difficulty == 0 || self.mining.initial_difficulty > MAX_BITS {
            return Err(CertelError::MalformedPayload(format!(
                "mining.initial_difficulty must be in 1..={MAX_BITS}"
            )));
        }
        if self.mining.difficulty_adjust == 0 {
            return Err(CertelError::MalformedPayload(
                "mining.difficulty_adjust must be positive".into(),
            ));
        }
        if self.mining.max_trans_per_block == 0 {
            return Err(CertelError::MalformedPayload(
                "mining.max_trans_per_block must be positive".into(),
            ));
        }
        if self.blockchain.block_time.is_zero() {
            return Err(CertelError::MalformedPayload(
                "blockchain.block_time must be positive".into(),
            ));
        }
        if self.blockchain.cert_expiry.is_zero() {
            return Err(CertelError::MalformedPayload(
                "blockchain.cert_expiry must be positive".into(),
            ));
        }
        if self.security.max_inquiry_age.is_zero() {
            return Err(CertelError::MalformedPayload(
                "security.max_inquiry_age must be positive".into(),
            ));
        }
        if !self.api.mock_verifier && self.api.persona_api_key.is_empty() {
            return Err(CertelError::MissingField("api.persona_api_key"));
        }
        for addr in &self.network.trusted_nodes {
            if certel_p2p::PeerManager::parse_address(addr).is_none() {
                return Err(CertelError::MalformedPayload(format!(
                    "network.trusted_nodes entry is not host:port: {addr}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "\
network:
  network_id: certel-test
  flag: test-flag
api:
  mock_verifier: true
"
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: NodeConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.network.port, 8333);
        assert_eq!(cfg.network.host, "0.0.0.0");
        assert_eq!(cfg.network.discovery_port, 45678);
        assert_eq!(cfg.blockchain.block_time, Duration::from_secs(600));
        assert_eq!(cfg.blockchain.cert_expiry, Duration::from_secs(8760 * 3600));
        assert_eq!(cfg.mining.initial_difficulty, 16);
        assert_eq!(cfg.mining.difficulty_adjust, 2016);
        assert_eq!(cfg.mining.max_trans_per_block, 1000);
        assert!(cfg.security.require_signature);
        assert_eq!(cfg.security.max_inquiry_age, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn humantime_durations_parse() {
        let yaml = "\
network:
  network_id: n
  flag: f
blockchain:
  block_time: 10m
  cert_expiry: 8760h
security:
  max_inquiry_age: 24h
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.blockchain.block_time, Duration::from_secs(600));
        assert_eq!(cfg.blockchain.cert_expiry, Duration::from_secs(8760 * 3600));
        assert_eq!(cfg.security.max_inquiry_age, Duration::from_secs(86_400));
    }

    #[test]
    fn missing_flag_or_network_id_is_fatal() {
        let yaml = "\
network:
  network_id: n
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(CertelError::MissingField("network.flag"))
        ));

        let yaml = "\
network:
  flag: f
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(CertelError::MissingField("network.network_id"))
        ));
    }

    #[test]
    fn persona_key_required_without_mock() {
        let yaml = "\
network:
  network_id: n
  flag: f
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(CertelError::MissingField("api.persona_api_key"))
        ));
    }

    #[test]
    fn out_of_range_numerics_are_fatal() {
        let yaml = "\
network:
  network_id: n
  flag: f
  port: 0
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());

        let yaml = "\
network:
  network_id: n
  flag: f
mining:
  initial_difficulty: 40
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_trusted_node_is_fatal() {
        let yaml = "\
network:
  network_id: n
  flag: f
  trusted_nodes: [\"not-an-address\"]
api:
  mock_verifier: true
";
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }
}
