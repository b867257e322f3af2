//! Contract action gateway
//!
//! Every user command goes through one of two operations:
//! - `submit_action`: validate, sign and submit a mutating call, then wait
//!   for inclusion
//! - `fetch_balance`: a read call whose result updates the displayed balances
//!
//! Neither retries, queues or deduplicates. Concurrent submissions each get
//! their own `PendingTransaction`, and a resubmission after a failure that
//! was actually mined will apply twice. The transaction hash is attached to
//! every failure raised after broadcast so the caller can check first.

use crate::audit::AuditLog;
use crate::contract::{ContractAction, ContractBackend, ContractHandle, ContractMethod, InclusionReceipt};
use crate::session::WalletSessionManager;
use crate::units::EtherAmount;
use crate::{Error, Result};
use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Untyped action request, as entered by a user
///
/// `value` is the decimal amount: transferred with `addBalance`, passed as
/// the argument of `refundUser`. `args` carries the provider address for
/// `payForSession`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    pub method: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl ActionRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl TryFrom<ActionRequest> for ContractAction {
    type Error = Error;

    fn try_from(request: ActionRequest) -> Result<Self> {
        let method = ContractMethod::from_name(request.method.trim()).ok_or_else(|| {
            Error::InvalidArgument(format!("Unknown contract method: {}", request.method))
        })?;

        let expected_args = usize::from(method == ContractMethod::PayForSession);
        if request.args.len() != expected_args {
            return Err(Error::InvalidArgument(format!(
                "{} takes {} argument(s), got {}",
                method,
                expected_args,
                request.args.len()
            )));
        }

        let takes_amount = matches!(method, ContractMethod::AddBalance | ContractMethod::RefundUser);
        let amount = match request.value.as_deref() {
            Some(_) if !takes_amount => {
                return Err(Error::InvalidArgument(format!("{} does not take an amount", method)))
            }
            Some(value) => Some(EtherAmount::parse_positive(value)?),
            None => None,
        };
        let required_amount = || {
            amount.ok_or_else(|| Error::InvalidArgument(format!("{} requires an amount", method)))
        };

        Ok(match method {
            ContractMethod::AddBalance => ContractAction::AddBalance {
                value: required_amount()?,
            },
            ContractMethod::RefundUser => ContractAction::RefundUser {
                amount: required_amount()?,
            },
            ContractMethod::PayForSession => ContractAction::PayForSession {
                provider: parse_provider(&request.args[0])?,
            },
            ContractMethod::RegisterProvider => ContractAction::RegisterProvider,
            ContractMethod::Withdraw => ContractAction::Withdraw,
        })
    }
}

/// Parse a provider address, rejecting empty and zero addresses
pub fn parse_provider(input: &str) -> Result<Address> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidArgument("Provider address is required".to_string()));
    }
    let address = Address::from_str(input)
        .map_err(|e| Error::InvalidArgument(format!("Invalid provider address '{}': {}", input, e)))?;
    if address.is_zero() {
        return Err(Error::InvalidArgument(
            "Provider address cannot be the zero address".to_string(),
        ));
    }
    Ok(address)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// One user-initiated contract transaction
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub method: ContractMethod,
    pub args: Vec<String>,
    pub value: Option<EtherAmount>,
    pub submitted_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
    pub status: TxStatus,
    pub receipt: Option<InclusionReceipt>,
}

impl PendingTransaction {
    pub fn new(action: &ContractAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: action.method(),
            args: action.display_args(),
            value: action.value(),
            submitted_at: Utc::now(),
            tx_hash: None,
            status: TxStatus::Submitted,
            receipt: None,
        }
    }
}

/// A broadcast transaction that has not been confirmed yet
pub struct SubmittedTransaction {
    transaction: PendingTransaction,
    contract: ContractHandle,
    audit: Option<AuditLog>,
}

impl SubmittedTransaction {
    pub fn transaction(&self) -> &PendingTransaction {
        &self.transaction
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.transaction.tx_hash
    }

    /// Wait for inclusion
    ///
    /// Failures carry the transaction hash: the transaction may still have
    /// been mined.
    pub async fn confirm(mut self) -> Result<PendingTransaction> {
        let Some(tx_hash) = self.transaction.tx_hash else {
            return Err(Error::TransactionFailed("transaction was never broadcast".to_string()));
        };

        match self.contract.backend().wait_for_inclusion(tx_hash).await {
            Ok(receipt) => {
                self.transaction.status = TxStatus::Confirmed;
                info!(
                    id = %self.transaction.id,
                    method = %self.transaction.method,
                    tx_hash = %tx_hash,
                    block = ?receipt.block_number,
                    gas_used = receipt.gas_used,
                    "Transaction confirmed"
                );
                self.transaction.receipt = Some(receipt);
                if let Some(audit) = &self.audit {
                    audit.record(&self.transaction, None).await;
                }
                Ok(self.transaction)
            }
            Err(e) => {
                let e = match e {
                    Error::TransactionFailed(reason) => {
                        Error::TransactionFailed(format!("{} (tx {})", reason, tx_hash))
                    }
                    other => Error::TransactionFailed(format!("{} (tx {})", other, tx_hash)),
                };
                Err(fail(&mut self.transaction, self.audit.as_ref(), e).await)
            }
        }
    }
}

/// Mark the transaction failed and normalize the error to `TransactionFailed`
async fn fail(transaction: &mut PendingTransaction, audit: Option<&AuditLog>, error: Error) -> Error {
    transaction.status = TxStatus::Failed;
    let reason = match error {
        Error::TransactionFailed(reason) => reason,
        other => other.to_string(),
    };
    warn!(
        id = %transaction.id,
        method = %transaction.method,
        tx_hash = ?transaction.tx_hash,
        reason = %reason,
        "Transaction failed"
    );
    if let Some(audit) = audit {
        audit.record(transaction, Some(&reason)).await;
    }
    Error::TransactionFailed(reason)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceKind {
    User,
    Contract,
}

/// Last fetched balances; `None` until fetched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayBalances {
    pub user_balance: Option<EtherAmount>,
    pub contract_balance: Option<EtherAmount>,
}

/// Fetched values; the user balance remembers whose it is
#[derive(Debug, Default)]
struct FetchedBalances {
    user: Option<(Address, EtherAmount)>,
    contract: Option<EtherAmount>,
}

pub struct ContractActionGateway {
    session: Arc<WalletSessionManager>,
    balances: RwLock<FetchedBalances>,
    audit: Option<AuditLog>,
}

impl ContractActionGateway {
    pub fn new(session: Arc<WalletSessionManager>) -> Self {
        Self {
            session,
            balances: RwLock::new(FetchedBalances::default()),
            audit: None,
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn session(&self) -> &Arc<WalletSessionManager> {
        &self.session
    }

    /// Validate an untyped request, then submit it and wait for inclusion
    pub async fn submit(&self, request: ActionRequest) -> Result<PendingTransaction> {
        let action = ContractAction::try_from(request)?;
        self.submit_action(action).await
    }

    /// Submit an action and wait for inclusion
    pub async fn submit_action(&self, action: ContractAction) -> Result<PendingTransaction> {
        self.send_action(action).await?.confirm().await
    }

    /// Sign and broadcast an action without waiting for inclusion
    pub async fn send_action(&self, action: ContractAction) -> Result<SubmittedTransaction> {
        let session = self.session.current().await?;
        let contract = session.contract().clone();
        let mut transaction = PendingTransaction::new(&action);

        info!(
            id = %transaction.id,
            method = %transaction.method,
            from = %session.account(),
            value = ?transaction.value.map(|v| v.to_string()),
            "Submitting contract action"
        );

        match contract.backend().submit(session.account(), &action).await {
            Ok(tx_hash) => {
                transaction.tx_hash = Some(tx_hash);
                info!(id = %transaction.id, tx_hash = %tx_hash, "Transaction broadcast");
                if let Some(audit) = &self.audit {
                    audit.record(&transaction, None).await;
                }
                Ok(SubmittedTransaction {
                    transaction,
                    contract,
                    audit: self.audit.clone(),
                })
            }
            Err(e) => Err(fail(&mut transaction, self.audit.as_ref(), e).await),
        }
    }

    /// Read a balance from the contract and update the displayed value
    ///
    /// On failure the displayed value is left as it was.
    pub async fn fetch_balance(&self, kind: BalanceKind) -> Result<EtherAmount> {
        let session = self.session.current().await?;
        let backend: &dyn ContractBackend = session.contract().backend();

        let read = match kind {
            BalanceKind::User => backend.user_balance(session.account()).await,
            BalanceKind::Contract => backend.contract_balance().await,
        };
        let amount = match read {
            Ok(wei) => EtherAmount::from_wei(wei),
            Err(Error::ReadFailed(reason)) => {
                warn!(?kind, reason = %reason, "Balance read failed");
                return Err(Error::ReadFailed(reason));
            }
            Err(e) => {
                warn!(?kind, error = %e, "Balance read failed");
                return Err(Error::ReadFailed(e.to_string()));
            }
        };

        let mut balances = self.balances.write().await;
        match kind {
            BalanceKind::User => balances.user = Some((session.account(), amount)),
            BalanceKind::Contract => balances.contract = Some(amount),
        }
        Ok(amount)
    }

    /// Snapshot of the displayed balances
    ///
    /// The user balance is only shown for the account currently connected.
    pub async fn balances(&self) -> DisplayBalances {
        let account = self.session.account().await;
        let balances = self.balances.read().await;
        DisplayBalances {
            user_balance: balances
                .user
                .filter(|(owner, _)| Some(*owner) == account)
                .map(|(_, amount)| amount),
            contract_balance: balances.contract,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{account, Grant, MockWallet};
    use crate::session::WalletEvent;
    use alloy::primitives::U256;
    use std::sync::atomic::Ordering;

    const PROVIDER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    async fn connected() -> (Arc<MockWallet>, ContractActionGateway) {
        let wallet = Arc::new(MockWallet::granting(vec![account(0xab)]));
        let session = Arc::new(WalletSessionManager::new(wallet.clone(), Address::ZERO));
        session.connect().await.unwrap();
        (wallet, ContractActionGateway::new(session))
    }

    fn disconnected(grant: Grant) -> (Arc<MockWallet>, ContractActionGateway) {
        let wallet = Arc::new(MockWallet::new(grant));
        let session = Arc::new(WalletSessionManager::new(wallet.clone(), Address::ZERO));
        (wallet, ContractActionGateway::new(session))
    }

    fn deposit(amount: &str) -> ActionRequest {
        ActionRequest::new("addBalance").value(amount)
    }

    #[test]
    fn test_request_validation() {
        let action = ContractAction::try_from(deposit("0.01")).unwrap();
        assert_eq!(
            action,
            ContractAction::AddBalance {
                value: "0.01".parse().unwrap()
            }
        );

        let action =
            ContractAction::try_from(ActionRequest::new("refundUser").value("0.5")).unwrap();
        assert!(matches!(action, ContractAction::RefundUser { .. }));

        let action =
            ContractAction::try_from(ActionRequest::new("payForSession").arg(PROVIDER)).unwrap();
        assert_eq!(
            action,
            ContractAction::PayForSession {
                provider: PROVIDER.parse().unwrap()
            }
        );

        assert_eq!(
            ContractAction::try_from(ActionRequest::new("withdraw")).unwrap(),
            ContractAction::Withdraw
        );
        assert_eq!(
            ContractAction::try_from(ActionRequest::new("registerProvider")).unwrap(),
            ContractAction::RegisterProvider
        );
    }

    #[test]
    fn test_request_validation_rejects_bad_input() {
        let bad = [
            ActionRequest::new("transferOwnership"),
            ActionRequest::new("addBalance"),
            deposit("0"),
            deposit("-1"),
            deposit("0.0000000000000000001"),
            ActionRequest::new("refundUser"),
            ActionRequest::new("withdraw").value("1"),
            ActionRequest::new("withdraw").arg(PROVIDER),
            ActionRequest::new("payForSession"),
            ActionRequest::new("payForSession").arg(""),
            ActionRequest::new("payForSession").arg("0x1234"),
            ActionRequest::new("payForSession").arg("not-an-address"),
            ActionRequest::new("payForSession").arg(Address::ZERO.to_string()),
            ActionRequest::new("payForSession").arg(PROVIDER).value("1"),
        ];
        for request in bad {
            let method = request.method.clone();
            assert!(
                matches!(ContractAction::try_from(request), Err(Error::InvalidArgument(_))),
                "accepted {method}"
            );
        }
    }

    #[tokio::test]
    async fn test_deposit_submits_base_units_and_confirms() {
        let (wallet, gateway) = connected().await;

        let tx = gateway.submit(deposit("0.01")).await.unwrap();

        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.method, ContractMethod::AddBalance);
        assert!(tx.tx_hash.is_some());
        assert!(tx.receipt.is_some());

        let submitted = wallet.contract.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        let (from, action) = &submitted[0];
        assert_eq!(*from, account(0xab));
        assert_eq!(
            action.value().unwrap().wei(),
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_deposit_then_fetch_user_balance() {
        let (wallet, gateway) = connected().await;

        gateway.submit(deposit("0.01")).await.unwrap();
        *wallet.contract.user_balance.lock().unwrap() = U256::from(10_000_000_000_000_000u64);

        let balance = gateway.fetch_balance(BalanceKind::User).await.unwrap();
        assert_eq!(balance.to_string(), "0.01");
        assert_eq!(gateway.balances().await.user_balance, Some(balance));
    }

    #[tokio::test]
    async fn test_not_connected_makes_no_network_calls() {
        let (wallet, gateway) = disconnected(Grant::Accounts(vec![account(1)]));

        assert!(matches!(
            gateway.submit(deposit("0.01")).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            gateway.submit_action(ContractAction::Withdraw).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            gateway.fetch_balance(BalanceKind::Contract).await,
            Err(Error::NotConnected)
        ));
        assert_eq!(wallet.contract.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_wallet_then_everything_not_connected() {
        let (wallet, gateway) = disconnected(Grant::Unavailable);

        assert!(matches!(
            gateway.session().connect().await,
            Err(Error::WalletUnavailable)
        ));
        assert!(matches!(
            gateway.submit(ActionRequest::new("registerProvider")).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            gateway.fetch_balance(BalanceKind::User).await,
            Err(Error::NotConnected)
        ));
        assert_eq!(wallet.contract.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_provider_fails_before_submission() {
        let (wallet, gateway) = connected().await;

        let err = gateway
            .submit(ActionRequest::new("payForSession").arg("0xnope"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(wallet.contract.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_balance_never_submits() {
        let (wallet, gateway) = connected().await;
        *wallet.contract.contract_balance.lock().unwrap() = U256::from(3_000_000_000_000_000_000u64);

        gateway.fetch_balance(BalanceKind::User).await.unwrap();
        let contract = gateway.fetch_balance(BalanceKind::Contract).await.unwrap();

        assert_eq!(contract.to_string(), "3");
        assert_eq!(wallet.contract.submit_count(), 0);
        assert_eq!(wallet.contract.read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_previous_balance() {
        let (wallet, gateway) = connected().await;
        *wallet.contract.user_balance.lock().unwrap() = U256::from(5u64);
        let first = gateway.fetch_balance(BalanceKind::User).await.unwrap();

        *wallet.contract.read_error.lock().unwrap() = Some("connection reset".to_string());
        *wallet.contract.user_balance.lock().unwrap() = U256::from(7u64);

        assert!(matches!(
            gateway.fetch_balance(BalanceKind::User).await,
            Err(Error::ReadFailed(_))
        ));
        assert_eq!(gateway.balances().await.user_balance, Some(first));
    }

    #[tokio::test]
    async fn test_user_balance_follows_connected_account() {
        let (wallet, gateway) = connected().await;
        *wallet.contract.user_balance.lock().unwrap() = U256::from(5u64);
        gateway.fetch_balance(BalanceKind::User).await.unwrap();
        gateway.fetch_balance(BalanceKind::Contract).await.unwrap();
        assert!(gateway.balances().await.user_balance.is_some());

        gateway
            .session()
            .handle_wallet_event(WalletEvent::AccountsChanged(vec![account(0xcd)]))
            .await
            .unwrap();
        let balances = gateway.balances().await;
        assert_eq!(balances.user_balance, None);
        assert!(balances.contract_balance.is_some());

        gateway.fetch_balance(BalanceKind::User).await.unwrap();
        assert!(gateway.balances().await.user_balance.is_some());

        gateway.session().disconnect().await;
        assert_eq!(gateway.balances().await.user_balance, None);
    }

    #[tokio::test]
    async fn test_submission_rejection_is_transaction_failed() {
        let (wallet, gateway) = connected().await;
        *wallet.contract.submit_error.lock().unwrap() = Some("user denied signature".to_string());

        let err = gateway
            .submit_action(ContractAction::RegisterProvider)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransactionFailed(ref r) if r == "user denied signature"));
        assert_eq!(wallet.contract.wait_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revert_is_transaction_failed_without_retry() {
        let (wallet, gateway) = connected().await;
        *wallet.contract.revert.lock().unwrap() = Some("execution reverted".to_string());

        let err = gateway
            .submit(ActionRequest::new("payForSession").arg(PROVIDER))
            .await
            .unwrap_err();

        let Error::TransactionFailed(reason) = err else {
            panic!("expected TransactionFailed, got {err:?}");
        };
        assert!(reason.starts_with("execution reverted"));
        assert!(reason.contains("(tx 0x"));
        assert_eq!(wallet.contract.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_send_exposes_hash_before_confirmation() {
        let (_, gateway) = connected().await;

        let submitted = gateway.send_action(ContractAction::Withdraw).await.unwrap();
        assert_eq!(submitted.transaction().status, TxStatus::Submitted);
        let hash = submitted.tx_hash().unwrap();

        let confirmed = submitted.confirm().await.unwrap();
        assert_eq!(confirmed.status, TxStatus::Confirmed);
        assert_eq!(confirmed.tx_hash, Some(hash));
    }

    #[tokio::test]
    async fn test_concurrent_deposits_are_independent() {
        let (wallet, gateway) = connected().await;

        let (first, second) = tokio::join!(
            gateway.submit(deposit("0.01")),
            gateway.submit(deposit("0.01"))
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.id, second.id);
        assert_ne!(first.tx_hash, second.tx_hash);
        assert_eq!(first.status, TxStatus::Confirmed);
        assert_eq!(second.status, TxStatus::Confirmed);
        assert_eq!(wallet.contract.submit_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_deposits_settle_independently() {
        let (wallet, gateway) = connected().await;
        wallet.contract.revert_submissions.lock().unwrap().push(2);

        let (first, second) = tokio::join!(
            gateway.submit(deposit("0.01")),
            gateway.submit(deposit("0.01"))
        );

        let (confirmed, failed): (Vec<_>, Vec<_>) =
            [first, second].into_iter().partition(|r| r.is_ok());
        assert_eq!(confirmed.len(), 1);
        assert_eq!(failed.len(), 1);
        assert_eq!(confirmed[0].as_ref().unwrap().status, TxStatus::Confirmed);
        assert!(matches!(failed[0], Err(Error::TransactionFailed(_))));
        assert_eq!(wallet.contract.submit_count(), 2);
    }

    #[tokio::test]
    async fn test_audit_log_records_outcome() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let (_, gateway) = connected().await;
        let gateway = gateway.with_audit_log(AuditLog::new(temp_file.path()));

        gateway.submit(deposit("1")).await.unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("transaction_submitted"));
        assert!(content.contains("transaction_confirmed"));
    }
}
