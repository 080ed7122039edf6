//! Configuration management for utxochain

use crate::error::{ChainError, Result};
use crate::wallet::validate_address;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mining: MiningConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// The first entry is the designated peer that unmined transactions are forwarded to.
    #[serde(default)]
    pub known_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: default_listen_addr(),
            known_peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MiningConfig {
    /// Receives the coinbase of blocks mined from the mempool; unset disables mining.
    #[serde(default)]
    pub reward_address: Option<String>,
    #[serde(default = "default_mempool_threshold")]
    pub mempool_threshold: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            reward_address: None,
            mempool_threshold: default_mempool_threshold(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_mempool_threshold() -> usize {
    2
}

impl Config {
    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.data_dir.is_empty() {
            return Err(ChainError::ConfigError(
                "node.data_dir must be set in config.toml".to_string(),
            ));
        }
        if self.mining.mempool_threshold == 0 {
            return Err(ChainError::ConfigError(
                "mining.mempool_threshold must be at least 1".to_string(),
            ));
        }
        if let Some(address) = &self.mining.reward_address {
            if !validate_address(address) {
                return Err(ChainError::ConfigError(format!(
                    "mining.reward_address {} is not a valid address",
                    address
                )));
            }
        }
        Ok(())
    }

    pub fn db_path(&self, chain_id: &str) -> PathBuf {
        Path::new(&self.node.data_dir).join(format!("blockchain_{}.db", chain_id))
    }

    pub fn wallet_path(&self, chain_id: &str) -> PathBuf {
        Path::new(&self.node.data_dir).join(format!("wallet_{}.dat", chain_id))
    }
}

/// Reads `path`, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<Config> {
    match fs::read_to_string(path) {
        Ok(config_str) => Config::parse(&config_str),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.mining.mempool_threshold, 2);
        assert!(config.mining.reward_address.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let miner = Wallet::new().unwrap().address();
        let config = Config::parse(&format!(
            r#"
            [node]
            known_peers = ["127.0.0.1:3001", "127.0.0.1:3002"]

            [mining]
            reward_address = "{}"
            "#,
            miner
        ))
        .unwrap();

        assert_eq!(config.node.data_dir, "./data");
        assert_eq!(config.node.known_peers.len(), 2);
        assert_eq!(config.mining.mempool_threshold, 2);
        assert_eq!(config.mining.reward_address.as_deref(), Some(miner.as_str()));
    }

    #[test]
    fn test_reward_address_must_be_valid() {
        assert!(matches!(
            Config::parse("[mining]\nreward_address = \"not-an-address\"\n"),
            Err(ChainError::ConfigError(_))
        ));

        let mut config = Config::default();
        let mut address = Wallet::new().unwrap().address();
        address.pop();
        config.mining.reward_address = Some(address);
        assert!(matches!(config.validate(), Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            Config::parse("[node]\ndata_dir = \"\"\n"),
            Err(ChainError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("[mining]\nmempool_threshold = 0\n"),
            Err(ChainError::ConfigError(_))
        ));
        assert!(matches!(
            Config::parse("[node\n"),
            Err(ChainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_chain_file_paths() {
        let config = Config::parse("[node]\ndata_dir = \"/var/chain\"\n").unwrap();
        assert_eq!(config.db_path("3000"), PathBuf::from("/var/chain/blockchain_3000.db"));
        assert_eq!(config.wallet_path("3000"), PathBuf::from("/var/chain/wallet_3000.dat"));
    }
}
