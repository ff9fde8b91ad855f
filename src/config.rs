//! Configuration management with network presets, environment overrides
//! and validation.

use crate::errors::{ConfigurationError, LotteryResult};
use crate::oracle::MAX_CALLBACK_GAS_LIMIT;
use crate::raffle::coordinator::{RandomnessRequest, NUM_WORDS};
use crate::raffle::engine::{RaffleParams, DEFAULT_HISTORY_LIMIT};
use crate::raffle::types::{parse_ether, Address, Amount};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HARDHAT_CHAIN_ID: u64 = 31337;
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

const MIN_REQUEST_CONFIRMATIONS: u16 = 3;
const MAX_REQUEST_CONFIRMATIONS: u16 = 200;

const HARDHAT_GAS_LANE: &str =
    "0x474e34a077df58807dbe9c96d3c009b23b3c6d0cce433e59bbf5b34f823bc56c";
const SEPOLIA_GAS_LANE: &str =
    "0x787d74caea10b2b357790d5b5247c2f63d1d91572a9846f780606e4d953677ae";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleConfig {
    pub network: NetworkSettings,
    pub raffle: RaffleSettings,
    pub vrf: VrfSettings,
    pub keeper: KeeperSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub name: String,
    pub chain_id: u64,
    /// Blocks the oracle waits before answering
    pub block_confirmations: u32,
    pub block_time_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleSettings {
    pub entrance_fee_wei: u64,
    pub interval_secs: u64,
    /// Settled rounds kept in memory, 0 keeps none
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfSettings {
    /// Gas lane, 32-byte hex
    pub key_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<u64>,
    /// Amount a freshly created development subscription is funded with
    pub subscription_fund_wei: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1_000,
        }
    }
}

impl KeeperSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self::hardhat()
    }
}

impl RaffleConfig {
    /// Local development chain
    pub fn hardhat() -> Self {
        Self {
            network: NetworkSettings {
                name: "hardhat".to_string(),
                chain_id: HARDHAT_CHAIN_ID,
                block_confirmations: 1,
                block_time_ms: 1_000,
            },
            raffle: RaffleSettings {
                entrance_fee_wei: 10_000_000_000_000_000, // 0.01 ETH
                interval_secs: 30,
                history_limit: DEFAULT_HISTORY_LIMIT,
            },
            vrf: VrfSettings {
                key_hash: HARDHAT_GAS_LANE.to_string(),
                subscription_id: None,
                subscription_fund_wei: 5_000_000_000_000_000_000, // 5 LINK
                request_confirmations: 3,
                callback_gas_limit: 500_000,
                num_words: NUM_WORDS,
            },
            keeper: KeeperSettings::default(),
        }
    }

    /// Sepolia testnet; the subscription id must be supplied
    pub fn sepolia() -> Self {
        // Same raffle economics as the local chain, public network and gas lane
        let mut config = Self::hardhat();
        config.network = NetworkSettings {
            name: "sepolia".to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            block_confirmations: 6,
            block_time_ms: 12_000,
        };
        config.vrf.key_hash = SEPOLIA_GAS_LANE.to_string();
        // Subscriptions on a public network are funded out of band
        config.vrf.subscription_fund_wei = 0;
        config.keeper.poll_interval_ms = 5_000;
        config
    }

    pub fn for_network(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "hardhat" | "localhost" => Ok(Self::hardhat()),
            "sepolia" => Ok(Self::sepolia()),
            other => Err(ConfigurationError::UnknownNetwork(other.to_string())),
        }
    }

    pub fn is_development_chain(&self) -> bool {
        matches!(self.network.chain_id, HARDHAT_CHAIN_ID | 1337)
    }

    pub fn entrance_fee(&self) -> Amount {
        Amount::from(self.raffle.entrance_fee_wei)
    }

    /// Delay standing in for `block_confirmations` blocks
    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(
            self.network
                .block_time_ms
                .saturating_mul(u64::from(self.network.block_confirmations)),
        )
    }

    pub fn key_hash_bytes(&self) -> Result<[u8; 32], ConfigurationError> {
        let stripped = self
            .vrf
            .key_hash
            .strip_prefix("0x")
            .unwrap_or(&self.vrf.key_hash);
        let invalid = |reason: &str| ConfigurationError::InvalidValue {
            field: "vrf.key_hash".to_string(),
            value: self.vrf.key_hash.clone(),
            reason: reason.to_string(),
        };
        hex::decode(stripped)
            .map_err(|_| invalid("not valid hex"))?
            .try_into()
            .map_err(|_| invalid("must be 32 bytes"))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        // Raffle economics
        if self.raffle.entrance_fee_wei == 0 {
            return Err(invalid_value("raffle.entrance_fee_wei", "0", "entrance fee cannot be zero"));
        }
        if self.raffle.interval_secs == 0 {
            return Err(invalid_value("raffle.interval_secs", "0", "interval cannot be zero"));
        }

        // Randomness request parameters
        if self.vrf.num_words != NUM_WORDS {
            return Err(invalid_value(
                "vrf.num_words",
                &self.vrf.num_words.to_string(),
                "the raffle consumes exactly one word",
            ));
        }
        if !(MIN_REQUEST_CONFIRMATIONS..=MAX_REQUEST_CONFIRMATIONS)
            .contains(&self.vrf.request_confirmations)
        {
            return Err(invalid_value(
                "vrf.request_confirmations",
                &self.vrf.request_confirmations.to_string(),
                "must be within 3..=200",
            ));
        }
        if self.vrf.callback_gas_limit == 0 || self.vrf.callback_gas_limit > MAX_CALLBACK_GAS_LIMIT
        {
            return Err(invalid_value(
                "vrf.callback_gas_limit",
                &self.vrf.callback_gas_limit.to_string(),
                "must be non-zero and within the coordinator maximum",
            ));
        }
        self.key_hash_bytes()?;

        // Development chains create their own subscription at startup
        if self.vrf.subscription_id.is_none() && !self.is_development_chain() {
            return Err(ConfigurationError::MissingRequired(
                "vrf.subscription_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine parameters for a consumer drawing on `subscription_id`
    pub fn raffle_params(
        &self,
        consumer: Address,
        subscription_id: u64,
    ) -> Result<RaffleParams, ConfigurationError> {
        Ok(RaffleParams {
            entrance_fee: self.entrance_fee(),
            interval: self.raffle.interval_secs,
            request: RandomnessRequest {
                key_hash: self.key_hash_bytes()?,
                subscription_id,
                request_confirmations: self.vrf.request_confirmations,
                callback_gas_limit: self.vrf.callback_gas_limit,
                num_words: self.vrf.num_words,
                consumer,
            },
            history_limit: self.raffle.history_limit,
        })
    }
}

fn invalid_value(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    network: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            network: "hardhat".to_string(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Preset used when no file is given
    pub fn with_network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }

    /// Load from file or preset, apply `RAFFLE_*` overrides, validate
    pub fn load(&self) -> LotteryResult<RaffleConfig> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::load`] with an explicit variable lookup
    pub fn load_with<F>(&self, lookup: F) -> LotteryResult<RaffleConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Start from the file if one was given, otherwise the network preset
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => RaffleConfig::for_network(&self.network)?,
        };

        // Environment wins over both
        Self::apply_env_overrides(&mut config, lookup)?;

        // Reject anything the engine or the coordinator would refuse later
        config.validate()?;

        tracing::debug!(network = %config.network.name, "configuration loaded");
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<RaffleConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides<F>(config: &mut RaffleConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Fee is given in ether, stored in wei
        if let Some(fee) = lookup("RAFFLE_ENTRANCE_FEE") {
            let wei = parse_ether(&fee)
                .ok()
                .and_then(|wei| u64::try_from(wei).ok())
                .ok_or_else(|| invalid_value("RAFFLE_ENTRANCE_FEE", &fee, "invalid ether amount"))?;
            config.raffle.entrance_fee_wei = wei;
        }
        if let Some(interval) = lookup("RAFFLE_INTERVAL") {
            config.raffle.interval_secs = parse_env("RAFFLE_INTERVAL", interval)?;
        }
        if let Some(limit) = lookup("RAFFLE_HISTORY_LIMIT") {
            config.raffle.history_limit = parse_env("RAFFLE_HISTORY_LIMIT", limit)?;
        }
        if let Some(sub) = lookup("RAFFLE_SUBSCRIPTION_ID") {
            config.vrf.subscription_id = Some(parse_env("RAFFLE_SUBSCRIPTION_ID", sub)?);
        }
        if let Some(key_hash) = lookup("RAFFLE_KEY_HASH") {
            config.vrf.key_hash = key_hash;
        }
        if let Some(gas) = lookup("RAFFLE_CALLBACK_GAS_LIMIT") {
            config.vrf.callback_gas_limit = parse_env("RAFFLE_CALLBACK_GAS_LIMIT", gas)?;
        }
        if let Some(poll) = lookup("RAFFLE_KEEPER_POLL_MS") {
            config.keeper.poll_interval_ms = parse_env("RAFFLE_KEEPER_POLL_MS", poll)?;
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(config: &RaffleConfig, path: P) -> LotteryResult<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize: {}", e)))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            ConfigurationError::SaveFailed(format!(
                "Failed to write {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: "not a valid number".to_string(),
    })
}

/// Write the preset for `network` to `path`
pub fn generate_sample_config<P: AsRef<Path>>(path: P, network: &str) -> LotteryResult<()> {
    let config = RaffleConfig::for_network(network)?;
    ConfigLoader::save(&config, path)
}
