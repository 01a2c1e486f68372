//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use dsync_chain::{ChainConfig, Genesis, DEFAULT_MAX_DIFF_LIMIT, DEFAULT_MAX_DIFF_SIZE};
use dsync_types::{Address, ChainParams, Timestamp};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a dsync node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Insert blocks from cached diff layers when one is available.
    #[serde(default)]
    pub light_process: bool,

    /// Capacity of the diff cache.
    #[serde(default = "default_max_diff_limit")]
    pub max_diff_limit: usize,

    /// Largest encoded diff layer accepted from a peer, in bytes.
    #[serde(default = "default_max_diff_size")]
    pub max_diff_size: usize,

    /// Time a remote gets to send its `Status` packet.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Address the P2P listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Peer addresses to dial on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Maximum number of peer connections.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Periodically refresh Prometheus metrics from chain counters.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub chain: ChainSection,

    #[serde(default)]
    pub genesis: GenesisSection,
}

/// Chain parameters exposed in the config file. Everything else in
/// [`ChainParams`] keeps its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSection {
    #[serde(default = "default_block_reward", with = "decimal")]
    pub block_reward: u128,

    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSection {
    #[serde(default)]
    pub timestamp: u64,

    #[serde(default)]
    pub alloc: Vec<GenesisAlloc>,
}

/// One pre-funded account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAlloc {
    /// Hex address, `0x` prefix optional.
    pub address: String,

    #[serde(with = "decimal")]
    pub balance: u128,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_max_diff_limit() -> usize {
    DEFAULT_MAX_DIFF_LIMIT
}

fn default_max_diff_size() -> usize {
    DEFAULT_MAX_DIFF_SIZE
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_listen_addr() -> String {
    "0.0.0.0:30311".to_string()
}

fn default_max_peers() -> usize {
    50
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_block_reward() -> u128 {
    ChainParams::default().block_reward
}

fn default_block_gas_limit() -> u64 {
    ChainParams::default().block_gas_limit
}

/// TOML integers stop at `i64`, so 128-bit amounts are written as decimal
/// strings. Plain integers are still accepted on input.
mod decimal {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v.into())
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom(format!("negative amount {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim()
                    .parse()
                    .map_err(|_| E::custom(format!("invalid amount {v:?}")))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            max_diff_limit: self.max_diff_limit,
            max_diff_size: self.max_diff_size,
            light_process: self.light_process,
            params: ChainParams {
                block_reward: self.chain.block_reward,
                block_gas_limit: self.chain.block_gas_limit,
                ..ChainParams::default()
            },
        }
    }

    /// Parse the genesis section. Fails on a malformed address.
    pub fn genesis(&self) -> Result<Genesis, NodeError> {
        let alloc = self
            .genesis
            .alloc
            .iter()
            .map(|entry| {
                entry
                    .address
                    .parse::<Address>()
                    .map(|address| (address, entry.balance))
                    .map_err(|e| {
                        NodeError::Config(format!("genesis address {:?}: {e}", entry.address))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Genesis::new(Timestamp::new(self.genesis.timestamp), alloc))
    }
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            block_reward: default_block_reward(),
            block_gas_limit: default_block_gas_limit(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            light_process: false,
            max_diff_limit: default_max_diff_limit(),
            max_diff_size: default_max_diff_size(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            listen_addr: default_listen_addr(),
            bootstrap_peers: Vec::new(),
            max_peers: default_max_peers(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
            chain: ChainSection::default(),
            genesis: GenesisSection::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let mut config = NodeConfig::default();
        config.genesis.alloc.push(GenesisAlloc {
            address: Address::repeat_byte(1).to_string(),
            balance: u128::MAX,
        });
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.max_peers, config.max_peers);
        assert_eq!(parsed.chain, config.chain);
        assert_eq!(parsed.genesis, config.genesis);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert!(!config.light_process);
        assert_eq!(config.max_diff_limit, 128);
        assert_eq!(config.max_diff_size, 1024 * 1024);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.log_format().unwrap(), LogFormat::Human);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            light_process = true
            max_diff_limit = 16

            [chain]
            block_reward = 7

            [genesis]
            timestamp = 100

            [[genesis.alloc]]
            address = "0x0101010101010101010101010101010101010101"
            balance = "340282366920938463463374607431768211455"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        let chain = config.chain_config();
        assert!(chain.light_process);
        assert_eq!(chain.max_diff_limit, 16);
        assert_eq!(chain.params.block_reward, 7);
        assert_eq!(chain.params.tx_base_gas, 21_000);
        assert_eq!(config.log_format, "human"); // default

        let genesis = config.genesis().unwrap();
        assert_eq!(genesis.timestamp, Timestamp::new(100));
        assert_eq!(genesis.alloc, vec![(Address::repeat_byte(1), u128::MAX)]);
    }

    #[test]
    fn bad_genesis_address_is_config_error() {
        let toml = r#"
            [[genesis.alloc]]
            address = "0xnothex"
            balance = 1
        "#;
        let config = NodeConfig::from_toml_str(toml).unwrap();
        assert!(matches!(config.genesis(), Err(NodeError::Config(_))));
    }

    #[test]
    fn negative_balance_is_rejected() {
        let toml = r#"
            [[genesis.alloc]]
            address = "0x0101010101010101010101010101010101010101"
            balance = -1
        "#;
        assert!(matches!(
            NodeConfig::from_toml_str(toml),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = \"127.0.0.1:0\"").unwrap();
        writeln!(file, "bootstrap_peers = [\"10.0.0.1:30311\"]").unwrap();
        let config = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert_eq!(config.bootstrap_peers, vec!["10.0.0.1:30311".to_string()]);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/dsync.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
