//! Controller configuration and genesis state.
//!
//! [`ControllerConfig`] is what an embedding node hands the controller at
//! construction; it can be built programmatically (tests) or loaded from a
//! TOML file. [`ChainConfiguration`] is the governable subset stored on
//! global properties and fixed per round.

use crate::error::ChainError;
use cascade_crypto::digest_parts;
use cascade_types::{AccountName, BlockTimestamp, Digest, PublicKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Chain-wide limits stored on global properties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfiguration {
    /// Upper bound on a block's serialized size in bytes.
    pub max_block_size: u32,
    /// How far in the future a transaction's expiration may lie, in seconds.
    pub max_transaction_lifetime_secs: u32,
    /// Recursion limit for authority resolution.
    pub max_authority_depth: u16,
}

impl Default for ChainConfiguration {
    fn default() -> Self {
        Self {
            max_block_size: 1024 * 1024,
            max_transaction_lifetime_secs: 3600,
            max_authority_depth: 6,
        }
    }
}

/// A producer in the genesis schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisProducer {
    pub name: AccountName,
    pub signing_key: PublicKey,
}

/// An account created at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub name: AccountName,
    pub owner_key: PublicKey,
    pub active_key: PublicKey,
    /// Tokens staked for bandwidth, consulted only when stake-proportional
    /// bandwidth enforcement is enabled.
    #[serde(default)]
    pub staked_balance: u64,
}

/// Everything needed to boot a brand-new chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Timestamp of the genesis state. Must fall exactly on a slot
    /// boundary; the first block is produced one interval later.
    pub initial_timestamp: BlockTimestamp,
    #[serde(default)]
    pub initial_configuration: ChainConfiguration,
    pub initial_producers: Vec<GenesisProducer>,
    #[serde(default)]
    pub initial_accounts: Vec<GenesisAccount>,
}

impl GenesisConfig {
    /// The chain id: a digest over the genesis parameters, binding every
    /// signature on this chain to this exact genesis.
    pub fn chain_id(&self) -> Digest {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(&self.initial_timestamp.slot().to_be_bytes());
        buffer.extend_from_slice(&self.initial_configuration.max_block_size.to_be_bytes());
        buffer.extend_from_slice(
            &self
                .initial_configuration
                .max_transaction_lifetime_secs
                .to_be_bytes(),
        );
        buffer.extend_from_slice(&self.initial_configuration.max_authority_depth.to_be_bytes());
        for producer in &self.initial_producers {
            buffer.extend_from_slice(producer.name.as_str().as_bytes());
            buffer.push(0);
            buffer.extend_from_slice(producer.signing_key.as_bytes());
        }
        for account in &self.initial_accounts {
            buffer.extend_from_slice(account.name.as_str().as_bytes());
            buffer.push(0);
            buffer.extend_from_slice(account.owner_key.as_bytes());
            buffer.extend_from_slice(account.active_key.as_bytes());
            buffer.extend_from_slice(&account.staked_balance.to_be_bytes());
        }
        digest_parts(&[b"cascade-chain-id", &buffer])
    }
}

/// Construction-time options for the controller.
///
/// Scalar options come before the genesis table so the struct serializes
/// cleanly to TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Directory holding the append-only block log.
    pub block_log_dir: PathBuf,

    /// Reject every mutating operation.
    #[serde(default)]
    pub read_only: bool,

    /// Enforce stake-proportional bandwidth limits. Accounting always
    /// happens; this gates rejection.
    #[serde(default)]
    pub enforce_bandwidth_limits: bool,

    /// Prune expired transaction-dedup and generated-transaction records
    /// after each applied block.
    #[serde(default)]
    pub prune_expired_transactions: bool,

    pub genesis: GenesisConfig,
}

impl ControllerConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ChainError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ChainError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis(producers: u8) -> GenesisConfig {
        GenesisConfig {
            initial_timestamp: BlockTimestamp::from_slot(1000),
            initial_configuration: ChainConfiguration::default(),
            initial_producers: (0..producers)
                .map(|i| GenesisProducer {
                    name: AccountName::new(format!("producer{i}")),
                    signing_key: PublicKey([i + 1; 32]),
                })
                .collect(),
            initial_accounts: Vec::new(),
        }
    }

    #[test]
    fn chain_id_is_deterministic() {
        assert_eq!(genesis(3).chain_id(), genesis(3).chain_id());
    }

    #[test]
    fn chain_id_differs_per_genesis() {
        assert_ne!(genesis(3).chain_id(), genesis(4).chain_id());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ControllerConfig {
            block_log_dir: PathBuf::from("/tmp/blocks"),
            read_only: false,
            genesis: genesis(2),
            enforce_bandwidth_limits: false,
            prune_expired_transactions: true,
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: ControllerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.genesis, config.genesis);
        assert!(parsed.prune_expired_transactions);
    }
}
