//! Wallet endpoint configuration
//!
//! The wallet is reached over JSON-RPC. Resolution order:
//! 1. `WALLET_RPC_URL` - a node or wallet daemon exposing the user's accounts
//! 2. `ETH_RPC_URL` - the usual Ethereum tooling variable
//!
//! With `PRIVATE_KEY` set, transactions are signed locally and the key's
//! address is the only account offered. With no endpoint at all, there is no
//! wallet and connecting fails with `WalletUnavailable`.
//!
//! ```bash
//! export WALLET_RPC_URL="http://127.0.0.1:8545"
//! export PRIVATE_KEY="0x..."   # optional
//! ```

use crate::contract::ConfirmationPolicy;
use crate::wallet::{RpcWallet, SecureWallet};
use crate::{Error, Result};
use secrecy::SecretString;
use url::Url;

/// Environment variable names
pub mod env_vars {
    pub const WALLET_RPC_URL: &str = "WALLET_RPC_URL";
    pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
}

/// Where the wallet lives and how it signs
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    endpoint: Option<String>,
    private_key: Option<SecretString>,
}

impl RpcConfig {
    /// Resolve from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let endpoint = match non_empty(env_vars::WALLET_RPC_URL) {
            Some(url) => {
                tracing::debug!("Using WALLET_RPC_URL for wallet");
                Some(url)
            }
            None => non_empty(env_vars::ETH_RPC_URL).inspect(|_| {
                tracing::debug!("Using ETH_RPC_URL for wallet");
            }),
        };

        Self {
            endpoint,
            private_key: non_empty(env_vars::PRIVATE_KEY).map(SecretString::from),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn has_signer(&self) -> bool {
        self.private_key.is_some()
    }

    /// Build the wallet connector
    pub fn wallet(&self, policy: ConfirmationPolicy) -> Result<RpcWallet> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| Error::Config(format!("Invalid wallet RPC URL '{}': {}", raw, e)))
            })
            .transpose()?;

        if endpoint.is_none() {
            tracing::warn!("No wallet RPC endpoint configured");
        }

        let signer = self
            .private_key
            .as_ref()
            .map(SecureWallet::from_secret)
            .transpose()?;
        if let Some(signer) = &signer {
            tracing::info!(address = %signer.address(), "Loaded signer from PRIVATE_KEY");
        }

        Ok(RpcWallet::new(endpoint, signer, policy))
    }
}
