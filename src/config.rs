//! Node configuration
//!
//! Every tunable of the sync engine lives here with its default. Configs
//! are plain JSON files; missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How much of the chain this node downloads and verifies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    /// Every block from genesis
    #[default]
    Full,
    /// Header proof chain, the most recent blocks, and an accounts snapshot
    Mini,
}

/// Consensus rules for the header chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainPolicy {
    /// Blocks between difficulty retargets
    pub adjustment_interval: u32,
    /// Expected seconds between blocks
    pub block_time_secs: u64,
    /// How far a timestamp may run ahead of the local clock
    pub timestamp_drift_secs: u64,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            adjustment_interval: 10,
            block_time_secs: 60,
            timestamp_drift_secs: 600,
        }
    }
}

/// Per-peer sync tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Queued vectors that trigger an immediate getdata
    pub request_threshold: usize,
    /// Coalescing delay for small inv bursts
    pub request_throttle_ms: u64,
    /// Deadline for any outstanding request
    pub request_timeout_ms: u64,
    /// Sync rounds without progress before the peer is banned
    pub max_sync_attempts: u32,
    /// Cap on inventory vectors returned for getblocks
    pub getblocks_vectors_max: usize,
    /// Header count requested by light clients
    pub getheaders_max: u16,
    /// Recent blocks downloaded and replayed by light clients
    pub verify_blocks_mini: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            request_threshold: 50,
            request_throttle_ms: 500,
            request_timeout_ms: 5_000,
            max_sync_attempts: 5,
            getblocks_vectors_max: 500,
            getheaders_max: 500,
            verify_blocks_mini: 50,
        }
    }
}

impl ConsensusConfig {
    pub fn request_throttle(&self) -> Duration {
        Duration::from_millis(self.request_throttle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Top-level node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data directory for chain storage
    pub data_dir: PathBuf,
    pub mode: ClientMode,
    pub policy: ChainPolicy,
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".chainsync_data"),
            mode: ClientMode::Full,
            policy: ChainPolicy::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.adjustment_interval == 0 {
            return Err(ConfigError::Invalid(
                "adjustment_interval must be positive".to_string(),
            ));
        }
        if self.policy.block_time_secs == 0 {
            return Err(ConfigError::Invalid(
                "block_time_secs must be positive".to_string(),
            ));
        }
        let max_headers = crate::network::message::MAX_HEADERS as u16;
        if !(1..=max_headers).contains(&self.consensus.getheaders_max) {
            return Err(ConfigError::Invalid(format!(
                "getheaders_max must be in 1..={}",
                max_headers
            )));
        }
        if self.consensus.request_threshold == 0 {
            return Err(ConfigError::Invalid(
                "request_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the header chain
    pub fn headers_dir(&self) -> PathBuf {
        self.data_dir.join("headers")
    }

    /// Directory holding the block chain
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "config.json";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.policy.adjustment_interval, 10);
        assert_eq!(config.policy.timestamp_drift_secs, 600);
        assert_eq!(config.consensus.request_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        fs::write(&path, r#"{"mode": "mini", "consensus": {"request_threshold": 10}}"#).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.mode, ClientMode::Mini);
        assert_eq!(config.consensus.request_threshold, 10);
        assert_eq!(config.consensus.request_throttle_ms, 500);
        assert_eq!(config.policy, ChainPolicy::default());
    }

    #[test]
    fn test_save_and_reject_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        let mut config = NodeConfig::default();
        config.save(&path).unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap(), config);

        config.consensus.getheaders_max = 0;
        config.save(&path).unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
