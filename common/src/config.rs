use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use bytesize::ByteSize;
use serde_derive::Deserialize;

use crate::logdb::LogDbFactoryRef;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("invalid gossip config: {0}")]
    InvalidGossip(String),
    #[error("invalid shard config: {0}")]
    InvalidShard(String),
    #[error("invalid node host config: {0}")]
    InvalidNodeHost(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Check whether `addr` is a `host:port` pair.
///
/// Surrounding whitespace is ignored. The host must be a non-empty run of ASCII alphanumerics, `.`
/// and `-`; the port must be within `1..=65535`. Dotted quads are not range checked, so
/// `300.0.0.1:80` is accepted as a hostname.
pub fn is_valid_address(addr: &str) -> bool {
    split_address(addr).is_some()
}

fn split_address(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.trim().rsplit_once(':')?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return None;
    }
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some((host, port)),
    }
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum LevelCompactionStrategy {
    Overlap,
    NonOverlap,
}

#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct LevelOptions {
    pub compaction_strategy: LevelCompactionStrategy,
}

const MIB: u64 = 1024 * 1024;

/// Tunables of the log storage engine.
///
/// Presets trade memory for throughput, see [`LogDbConfig::memory_size_mb`].
#[derive(Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct LogDbConfig {
    pub shards: u64,
    pub kv_write_buffer_size: ByteSize,
    pub kv_max_write_buffer_number: u64,
    pub kv_lru_cache_size: ByteSize,
    pub kv_max_background_compactions: u64,
    pub kv_num_of_levels: usize,
    /// How many times the cleaner retries a failed table file removal.
    pub obsolete_file_retry_attempts: usize,
    #[serde(with = "humantime_serde")]
    pub obsolete_file_retry_interval: Duration,
}

impl LogDbConfig {
    fn with_write_buffer_size(kv_write_buffer_size: ByteSize) -> Self {
        Self {
            shards: 16,
            kv_write_buffer_size,
            kv_max_write_buffer_number: 4,
            kv_lru_cache_size: ByteSize::b(0),
            kv_max_background_compactions: 2,
            kv_num_of_levels: 7,
            obsolete_file_retry_attempts: 3,
            obsolete_file_retry_interval: Duration::from_millis(100),
        }
    }

    pub fn tiny() -> Self {
        Self::with_write_buffer_size(ByteSize::mib(4))
    }

    pub fn small() -> Self {
        Self::with_write_buffer_size(ByteSize::mib(16))
    }

    pub fn medium() -> Self {
        Self::with_write_buffer_size(ByteSize::mib(64))
    }

    pub fn large() -> Self {
        Self::with_write_buffer_size(ByteSize::mib(128))
    }

    pub fn default_config() -> Self {
        Self::large()
    }

    /// Memory taken by write buffers across all shards, in MiB.
    pub fn memory_size_mb(&self) -> u64 {
        self.kv_write_buffer_size
            .as_u64()
            .saturating_mul(self.kv_max_write_buffer_number)
            .saturating_mul(self.shards)
            / MIB
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// L0 accepts overlapping tables, every deeper level is kept sorted and disjoint.
    pub fn levels_options(&self) -> Vec<LevelOptions> {
        (0..self.kv_num_of_levels)
            .map(|level| LevelOptions {
                compaction_strategy: if level == 0 {
                    LevelCompactionStrategy::Overlap
                } else {
                    LevelCompactionStrategy::NonOverlap
                },
            })
            .collect()
    }
}

impl FromStr for LogDbConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = toml::from_str(s)?;
        Ok(c)
    }
}

#[derive(Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct EngineConfig {
    pub exec_shards: u64,
    pub commit_shards: u64,
    pub apply_shards: u64,
    pub snapshot_shards: u64,
    pub close_shards: u64,
}

impl EngineConfig {
    pub fn default_config() -> Self {
        Self {
            exec_shards: 16,
            commit_shards: 16,
            apply_shards: 16,
            snapshot_shards: 48,
            close_shards: 32,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct GossipConfig {
    pub bind_address: String,
    pub advertise_address: String,
    pub seed: Vec<String>,
}

impl GossipConfig {
    pub fn is_empty(&self) -> bool {
        self.bind_address.is_empty() && self.advertise_address.is_empty() && self.seed.is_empty()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !is_valid_address(&self.bind_address) {
            return Err(ConfigError::InvalidGossip(format!(
                "invalid bind address {:?}",
                self.bind_address
            )));
        }
        if !self.advertise_address.is_empty() {
            let host = split_address(&self.advertise_address)
                .map(|(host, _)| host)
                .ok_or_else(|| {
                    ConfigError::InvalidGossip(format!(
                        "invalid advertise address {:?}",
                        self.advertise_address
                    ))
                })?;
            if host.parse::<IpAddr>().is_err() {
                return Err(ConfigError::InvalidGossip(format!(
                    "advertise address {:?} must use an ip address",
                    self.advertise_address
                )));
            }
        }
        if self.seed.is_empty() {
            return Err(ConfigError::InvalidGossip("seed not specified".to_string()));
        }
        for seed in &self.seed {
            if !is_valid_address(seed) {
                return Err(ConfigError::InvalidGossip(format!(
                    "invalid seed address {:?}",
                    seed
                )));
            }
            if seed.trim() == self.bind_address.trim()
                || seed.trim() == self.advertise_address.trim()
            {
                return Err(ConfigError::InvalidGossip(format!(
                    "seed {:?} points to the node itself",
                    seed
                )));
            }
        }
        Ok(())
    }
}

/// Per raft shard config.
#[derive(Deserialize, Clone, Default, Debug)]
#[serde(default)]
pub struct ShardConfig {
    pub shard_id: u64,
    pub replica_id: u64,
    pub election_rtt: u64,
    pub heartbeat_rtt: u64,
    pub snapshot_entries: u64,
    pub is_non_voting: bool,
    pub is_witness: bool,
}

impl ShardConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.replica_id == 0 {
            return Err(ConfigError::InvalidShard("invalid replica id".to_string()));
        }
        if self.heartbeat_rtt == 0 {
            return Err(ConfigError::InvalidShard(
                "heartbeat rtt must be > 0".to_string(),
            ));
        }
        if self
            .heartbeat_rtt
            .checked_mul(2)
            .map_or(true, |min| self.election_rtt <= min)
        {
            return Err(ConfigError::InvalidShard(
                "election rtt must be > 2 * heartbeat rtt".to_string(),
            ));
        }
        if self.is_witness && self.is_non_voting {
            return Err(ConfigError::InvalidShard(
                "witness node can not be non-voting".to_string(),
            ));
        }
        if self.is_witness && self.snapshot_entries > 0 {
            return Err(ConfigError::InvalidShard(
                "witness node can not take snapshot".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Default, Debug)]
#[serde(default)]
pub struct ExpertConfig {
    pub engine: EngineConfig,
    pub log_db: LogDbConfig,
    #[serde(skip)]
    pub log_db_factory: Option<LogDbFactoryRef>,
}

#[derive(Deserialize, Clone, Default, Debug)]
#[serde(default)]
pub struct NodeHostConfig {
    pub node_host_dir: String,
    /// Directory of the log storage engine, falls back to `node_host_dir` when empty.
    pub wal_dir: String,
    pub rtt_millisecond: u64,
    pub raft_address: String,
    pub listen_address: String,
    pub default_node_registry_enabled: bool,
    pub gossip: GossipConfig,
    #[serde(skip)]
    pub log_db_factory: Option<LogDbFactoryRef>,
    pub expert: ExpertConfig,
}

impl NodeHostConfig {
    pub fn listen_address(&self) -> &str {
        if self.listen_address.is_empty() {
            &self.raft_address
        } else {
            &self.listen_address
        }
    }

    pub fn wal_dir(&self) -> &str {
        if self.wal_dir.is_empty() {
            &self.node_host_dir
        } else {
            &self.wal_dir
        }
    }

    /// Fill unset expert sections with their defaults.
    pub fn prepare(&mut self) -> ConfigResult<()> {
        if self.expert.engine.is_empty() {
            self.expert.engine = EngineConfig::default_config();
        }
        if self.expert.log_db.is_empty() {
            self.expert.log_db = LogDbConfig::default_config();
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.rtt_millisecond == 0 {
            return Err(ConfigError::InvalidNodeHost(
                "invalid rtt millisecond".to_string(),
            ));
        }
        if !is_valid_address(&self.raft_address) {
            return Err(ConfigError::InvalidAddress(self.raft_address.clone()));
        }
        if !self.listen_address.is_empty() && !is_valid_address(&self.listen_address) {
            return Err(ConfigError::InvalidAddress(self.listen_address.clone()));
        }
        if self.log_db_factory.is_some() && self.expert.log_db_factory.is_some() {
            return Err(ConfigError::InvalidNodeHost(
                "log db factory and expert log db factory can not be set together".to_string(),
            ));
        }
        if self.default_node_registry_enabled && self.gossip.is_empty() {
            return Err(ConfigError::InvalidNodeHost(
                "gossip must be configured when default node registry is enabled".to_string(),
            ));
        }
        if !self.gossip.is_empty() {
            self.gossip.validate()?;
        }
        Ok(())
    }

    /// The storage engine factory picked by this config, if any.
    pub fn log_db_factory(&self) -> Option<LogDbFactoryRef> {
        self.expert
            .log_db_factory
            .clone()
            .or_else(|| self.log_db_factory.clone())
    }
}

impl FromStr for NodeHostConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = toml::from_str(s)?;
        Ok(c)
    }
}
