//! VPN marketplace contract boundary
//!
//! The contract is authoritative for balances, session payments and the
//! provider registry. This module only encodes calls, submits them through a
//! signing-capable provider, and decodes reads.

use crate::units::EtherAmount;
use crate::{Error, Result};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider};
use alloy::sol;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

sol! {
    #[sol(rpc)]
    interface IVpnMarketplace {
        function addBalance() external payable;
        function getUserBalance(address user) external view returns (uint256);
        function payForSession(address provider) external;
        function refundUser(uint256 amount) external;
        function registerProvider() external;
        function withdraw() external;
        function getContractBalance() external view returns (uint256);
    }
}

/// Mutating contract methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContractMethod {
    #[serde(rename = "addBalance")]
    AddBalance,
    #[serde(rename = "payForSession")]
    PayForSession,
    #[serde(rename = "refundUser")]
    RefundUser,
    #[serde(rename = "registerProvider")]
    RegisterProvider,
    #[serde(rename = "withdraw")]
    Withdraw,
}

impl ContractMethod {
    pub const ALL: [ContractMethod; 5] = [
        ContractMethod::AddBalance,
        ContractMethod::PayForSession,
        ContractMethod::RefundUser,
        ContractMethod::RegisterProvider,
        ContractMethod::Withdraw,
    ];

    /// Solidity function name
    pub fn name(&self) -> &'static str {
        match self {
            ContractMethod::AddBalance => "addBalance",
            ContractMethod::PayForSession => "payForSession",
            ContractMethod::RefundUser => "refundUser",
            ContractMethod::RegisterProvider => "registerProvider",
            ContractMethod::Withdraw => "withdraw",
        }
    }

    /// Look up a method by its Solidity name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for ContractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated contract action, ready to encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractAction {
    AddBalance { value: EtherAmount },
    PayForSession { provider: Address },
    RefundUser { amount: EtherAmount },
    RegisterProvider,
    Withdraw,
}

impl ContractAction {
    pub fn method(&self) -> ContractMethod {
        match self {
            ContractAction::AddBalance { .. } => ContractMethod::AddBalance,
            ContractAction::PayForSession { .. } => ContractMethod::PayForSession,
            ContractAction::RefundUser { .. } => ContractMethod::RefundUser,
            ContractAction::RegisterProvider => ContractMethod::RegisterProvider,
            ContractAction::Withdraw => ContractMethod::Withdraw,
        }
    }

    /// Value transferred with the call, if any
    pub fn value(&self) -> Option<EtherAmount> {
        match self {
            ContractAction::AddBalance { value } => Some(*value),
            _ => None,
        }
    }

    /// Call arguments rendered for display and audit
    pub fn display_args(&self) -> Vec<String> {
        match self {
            ContractAction::PayForSession { provider } => vec![provider.to_string()],
            ContractAction::RefundUser { amount } => vec![amount.to_string()],
            _ => Vec::new(),
        }
    }
}

/// Inclusion report for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InclusionReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Signing-capable access to the deployed contract
///
/// Implementations map their failures onto the crate error taxonomy:
/// submission and inclusion problems become `TransactionFailed`, read
/// problems become `ReadFailed`.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    /// Sign and broadcast a call from `from`. Returns once the network has
    /// accepted the transaction, not once it is final.
    async fn submit(&self, from: Address, action: &ContractAction) -> Result<TxHash>;

    /// Wait until the transaction is included. A reverted receipt is an error.
    async fn wait_for_inclusion(&self, tx_hash: TxHash) -> Result<InclusionReceipt>;

    async fn user_balance(&self, user: Address) -> Result<U256>;

    async fn contract_balance(&self) -> Result<U256>;
}

/// Contract address bound to a signing capability
#[derive(Clone)]
pub struct ContractHandle {
    address: Address,
    backend: Arc<dyn ContractBackend>,
}

impl ContractHandle {
    pub fn new(address: Address, backend: Arc<dyn ContractBackend>) -> Self {
        Self { address, backend }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn backend(&self) -> &dyn ContractBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Inclusion wait settings
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub timeout: Option<Duration>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: None,
        }
    }
}

/// `ContractBackend` over an alloy provider
pub struct AlloyContract {
    contract: IVpnMarketplace::IVpnMarketplaceInstance<DynProvider>,
    provider: DynProvider,
    policy: ConfirmationPolicy,
}

impl AlloyContract {
    pub fn new(address: Address, provider: DynProvider, policy: ConfirmationPolicy) -> Self {
        Self {
            contract: IVpnMarketplace::new(address, provider.clone()),
            provider,
            policy,
        }
    }
}

#[async_trait]
impl ContractBackend for AlloyContract {
    async fn submit(&self, from: Address, action: &ContractAction) -> Result<TxHash> {
        let sent = match action {
            ContractAction::AddBalance { value } => {
                self.contract.addBalance().from(from).value(value.wei()).send().await
            }
            ContractAction::PayForSession { provider } => {
                self.contract.payForSession(*provider).from(from).send().await
            }
            ContractAction::RefundUser { amount } => {
                self.contract.refundUser(amount.wei()).from(from).send().await
            }
            ContractAction::RegisterProvider => {
                self.contract.registerProvider().from(from).send().await
            }
            ContractAction::Withdraw => self.contract.withdraw().from(from).send().await,
        };

        let pending = sent.map_err(|e| Error::TransactionFailed(parse_revert_reason(&e.to_string())))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_inclusion(&self, tx_hash: TxHash) -> Result<InclusionReceipt> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_required_confirmations(self.policy.confirmations)
            .with_timeout(self.policy.timeout)
            .get_receipt()
            .await
            .map_err(|e| Error::TransactionFailed(e.to_string()))?;

        if !receipt.status() {
            return Err(Error::TransactionFailed("execution reverted".to_string()));
        }

        Ok(InclusionReceipt {
            tx_hash,
            block_number: receipt.block_number(),
            gas_used: receipt.gas_used(),
        })
    }

    async fn user_balance(&self, user: Address) -> Result<U256> {
        self.contract
            .getUserBalance(user)
            .call()
            .await
            .map_err(|e| Error::ReadFailed(format!("getUserBalance: {}", e)))
    }

    async fn contract_balance(&self) -> Result<U256> {
        self.contract
            .getContractBalance()
            .call()
            .await
            .map_err(|e| Error::ReadFailed(format!("getContractBalance: {}", e)))
    }
}

/// Extract a readable reason from an RPC error message
fn parse_revert_reason(error: &str) -> String {
    if let Some(start) = error.find("revert: ") {
        let reason = &error[start + 8..];
        return match reason.find('"') {
            Some(end) => reason[..end].to_string(),
            None => reason.to_string(),
        };
    }
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_method_names_round_trip() {
        for method in ContractMethod::ALL {
            assert_eq!(ContractMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(ContractMethod::from_name("selfdestruct"), None);
    }

    #[test]
    fn test_call_value_only_for_deposit() {
        let amount: EtherAmount = "0.01".parse().unwrap();
        assert_eq!(
            ContractAction::AddBalance { value: amount }.value(),
            Some(amount)
        );
        assert_eq!(ContractAction::RefundUser { amount }.value(), None);
        assert_eq!(ContractAction::Withdraw.value(), None);
    }

    #[test]
    fn test_refund_encodes_base_units() {
        let amount: EtherAmount = "0.01".parse().unwrap();
        let encoded = IVpnMarketplace::refundUserCall {
            amount: amount.wei(),
        }
        .abi_encode();
        assert_eq!(&encoded[..4], IVpnMarketplace::refundUserCall::SELECTOR.as_slice());
        assert_eq!(
            U256::from_be_slice(&encoded[4..36]),
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_parse_revert_reason() {
        let error = "server returned an error response: execution reverted: revert: Insufficient balance\"";
        assert_eq!(parse_revert_reason(error), "Insufficient balance");

        let error = "insufficient funds for gas * price + value";
        assert_eq!(parse_revert_reason(error), error);
    }
}
