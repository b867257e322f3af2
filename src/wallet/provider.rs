//! Wallet provider boundary
//!
//! A wallet grants access to accounts (possibly after prompting the user) and
//! signs transactions for them. `RpcWallet` talks to any EIP-1193 style
//! JSON-RPC endpoint: a wallet bridge, a node with unlocked accounts, or a
//! plain node combined with a locally held key.

use crate::contract::{AlloyContract, ConfirmationPolicy, ContractHandle};
use crate::wallet::SecureWallet;
use crate::{Error, Result};
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// EIP-1193 "user rejected the request"
const USER_REJECTED: i64 = 4001;
/// EIP-1193 "unauthorized"
const UNAUTHORIZED: i64 = 4100;
/// EIP-1193 "unsupported method"
const UNSUPPORTED_METHOD: i64 = 4200;
/// JSON-RPC "method not found"
const METHOD_NOT_FOUND: i64 = -32601;

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for account access. May prompt the user.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Accounts currently exposed by the wallet, without prompting
    async fn accounts(&self) -> Result<Vec<Address>>;

    /// Chain the wallet is connected to
    async fn chain_id(&self) -> Result<u64>;

    /// Bind the contract at `contract` to `account`'s signing capability
    fn bind_contract(&self, account: Address, contract: Address) -> Result<ContractHandle>;
}

/// How a JSON-RPC failure should be treated at the wallet boundary
#[derive(Debug, PartialEq, Eq)]
enum RpcFailure {
    Unreachable,
    Rejected,
    Unsupported,
    Other(String),
}

/// Error for a failed `eth_requestAccounts`, or `None` when the endpoint
/// does not support it and `eth_accounts` should be asked instead
fn account_request_error(err: &TransportError) -> Option<Error> {
    match classify(err) {
        RpcFailure::Unreachable => {
            tracing::warn!(error = %err, "Wallet endpoint unreachable");
            Some(Error::WalletUnavailable)
        }
        RpcFailure::Rejected => Some(Error::UserRejected),
        RpcFailure::Unsupported => None,
        RpcFailure::Other(reason) => {
            tracing::warn!(error = %reason, "Account request failed");
            Some(Error::ReadFailed(format!("eth_requestAccounts: {}", reason)))
        }
    }
}

fn classify(err: &TransportError) -> RpcFailure {
    if let RpcError::Transport(_) = err {
        return RpcFailure::Unreachable;
    }
    match err.as_error_resp().map(|payload| payload.code) {
        Some(USER_REJECTED) | Some(UNAUTHORIZED) => RpcFailure::Rejected,
        Some(UNSUPPORTED_METHOD) | Some(METHOD_NOT_FOUND) => RpcFailure::Unsupported,
        _ => RpcFailure::Other(err.to_string()),
    }
}

/// Wallet reached over a JSON-RPC endpoint
#[derive(Debug)]
pub struct RpcWallet {
    endpoint: Option<Url>,
    signer: Option<SecureWallet>,
    policy: ConfirmationPolicy,
}

impl RpcWallet {
    /// Create a wallet connector
    ///
    /// `endpoint = None` models an environment with no wallet installed.
    /// With a `signer`, its address is the only account and transactions are
    /// signed locally before broadcast.
    pub fn new(
        endpoint: Option<Url>,
        signer: Option<SecureWallet>,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            endpoint,
            signer,
            policy,
        }
    }

    fn provider(&self) -> Result<DynProvider> {
        let url = self.endpoint.clone().ok_or(Error::WalletUnavailable)?;
        let provider = match &self.signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(signer.wallet().clone())
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };
        Ok(provider)
    }

    async fn exposed_accounts(&self, provider: &DynProvider) -> Result<Vec<Address>> {
        provider.get_accounts().await.map_err(|e| match classify(&e) {
            RpcFailure::Unreachable => Error::WalletUnavailable,
            RpcFailure::Rejected => Error::UserRejected,
            _ => Error::ReadFailed(format!("eth_accounts: {}", e)),
        })
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let provider = self.provider()?;
        if let Some(signer) = &self.signer {
            return Ok(vec![signer.address()]);
        }

        let requested: std::result::Result<Vec<Address>, TransportError> = provider
            .client()
            .request_noparams("eth_requestAccounts")
            .await;

        match requested {
            Ok(accounts) => Ok(accounts),
            Err(e) => match account_request_error(&e) {
                Some(error) => Err(error),
                None => {
                    tracing::debug!("eth_requestAccounts unsupported, falling back to eth_accounts");
                    self.exposed_accounts(&provider).await
                }
            },
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        let provider = self.provider()?;
        match &self.signer {
            Some(signer) => Ok(vec![signer.address()]),
            None => self.exposed_accounts(&provider).await,
        }
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider()?
            .get_chain_id()
            .await
            .map_err(|e| match classify(&e) {
                RpcFailure::Unreachable => Error::WalletUnavailable,
                _ => Error::ReadFailed(format!("eth_chainId: {}", e)),
            })
    }

    fn bind_contract(&self, account: Address, contract: Address) -> Result<ContractHandle> {
        if let Some(signer) = &self.signer {
            if signer.address() != account {
                return Err(Error::InvalidArgument(format!(
                    "Account {} is not controlled by the configured key",
                    account
                )));
            }
        }
        let backend = AlloyContract::new(contract, self.provider()?, self.policy);
        Ok(ContractHandle::new(contract, Arc::new(backend)))
    }
}
