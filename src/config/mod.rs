//! Configuration for the VPN marketplace client

pub mod rpc;

use crate::contract::ConfirmationPolicy;
use crate::{Error, Result};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use rpc::RpcConfig;

/// Contract address environment variable name
pub const CONTRACT_ADDRESS_ENV: &str = "DVPN_CONTRACT_ADDRESS";
/// Expected chain id environment variable name
pub const CHAIN_ID_ENV: &str = "DVPN_CHAIN_ID";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployed marketplace contract
    pub contract_address: Option<Address>,
    /// Chain the contract is deployed on; a wallet on another chain is only
    /// warned about
    pub chain_id: Option<u64>,
    /// Blocks required before a transaction counts as included
    pub confirmations: u64,
    /// Give up waiting for inclusion after this many seconds
    pub receipt_timeout_secs: Option<u64>,
    /// Wallet account/chain polling interval (milliseconds)
    pub wallet_poll_interval_ms: u64,
    /// Path to audit log file
    pub audit_log_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contract_address: None,
            chain_id: None,
            confirmations: 1,
            receipt_timeout_secs: Some(300),
            wallet_poll_interval_ms: 2_000,
            audit_log_path: Some("transactions.jsonl".to_string()),
        }
    }
}

impl Config {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    Error::Config(format!("Invalid config {}: {}", path.display(), e))
                })?
            }
            None => Config::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `DVPN_*` overrides from a variable source
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(CONTRACT_ADDRESS_ENV) {
            let address = Address::from_str(raw.trim()).map_err(|e| {
                Error::Config(format!("{} is not an address: {}", CONTRACT_ADDRESS_ENV, e))
            })?;
            self.contract_address = Some(address);
        }
        if let Some(raw) = lookup(CHAIN_ID_ENV) {
            let chain_id = raw.trim().parse().map_err(|e| {
                Error::Config(format!("{} is not a chain id: {}", CHAIN_ID_ENV, e))
            })?;
            self.chain_id = Some(chain_id);
        }
        Ok(())
    }

    /// The configured contract, which every command needs
    pub fn contract_address(&self) -> Result<Address> {
        match self.contract_address {
            Some(address) if !address.is_zero() => Ok(address),
            _ => Err(Error::Config(format!(
                "No contract address configured (set {} or contract_address)",
                CONTRACT_ADDRESS_ENV
            ))),
        }
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            confirmations: self.confirmations.max(1),
            timeout: self.receipt_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn wallet_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wallet_poll_interval_ms.max(100))
    }
}
