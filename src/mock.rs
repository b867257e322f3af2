//! In-memory wallet and contract doubles for unit tests

use crate::contract::{ContractBackend, ContractAction, ContractHandle, InclusionReceipt};
use crate::wallet::WalletProvider;
use crate::{Error, Result};
use alloy::primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn account(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// What the mock wallet answers to an account request
#[derive(Debug, Clone)]
pub(crate) enum Grant {
    Accounts(Vec<Address>),
    Unavailable,
    Rejected,
}

pub(crate) struct MockWallet {
    grant: Mutex<Grant>,
    chain_id: AtomicU64,
    pub contract: Arc<MockContract>,
    pub request_calls: AtomicUsize,
    pub bind_calls: AtomicUsize,
}

impl MockWallet {
    pub fn new(grant: Grant) -> Self {
        Self {
            grant: Mutex::new(grant),
            chain_id: AtomicU64::new(1),
            contract: Arc::new(MockContract::default()),
            request_calls: AtomicUsize::new(0),
            bind_calls: AtomicUsize::new(0),
        }
    }

    pub fn granting(accounts: Vec<Address>) -> Self {
        Self::new(Grant::Accounts(accounts))
    }

    pub fn set_grant(&self, grant: Grant) {
        *self.grant.lock().unwrap() = grant;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    fn answer(&self) -> Result<Vec<Address>> {
        match &*self.grant.lock().unwrap() {
            Grant::Accounts(accounts) => Ok(accounts.clone()),
            Grant::Unavailable => Err(Error::WalletUnavailable),
            Grant::Rejected => Err(Error::UserRejected),
        }
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        // Let a concurrent caller observe the in-flight attempt
        tokio::task::yield_now().await;
        self.answer()
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.answer()
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    fn bind_contract(&self, _account: Address, contract: Address) -> Result<ContractHandle> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContractHandle::new(contract, self.contract.clone()))
    }
}

#[derive(Default)]
pub(crate) struct MockContract {
    pub submitted: Mutex<Vec<(Address, ContractAction)>>,
    pub submit_calls: AtomicUsize,
    pub wait_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub user_balance: Mutex<U256>,
    pub contract_balance: Mutex<U256>,
    pub submit_error: Mutex<Option<String>>,
    pub revert: Mutex<Option<String>>,
    /// Submissions (1-based, in order) whose inclusion reverts
    pub revert_submissions: Mutex<Vec<u64>>,
    pub read_error: Mutex<Option<String>>,
    nonce: AtomicU64,
}

impl MockContract {
    pub fn network_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
            + self.wait_calls.load(Ordering::SeqCst)
            + self.read_calls.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Hash returned for the `n`th submission
    pub fn tx_hash(n: u64) -> TxHash {
        B256::from(U256::from(n))
    }
}

#[async_trait]
impl ContractBackend for MockContract {
    async fn submit(&self, from: Address, action: &ContractAction) -> Result<TxHash> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.submit_error.lock().unwrap().clone() {
            return Err(Error::TransactionFailed(reason));
        }
        self.submitted.lock().unwrap().push((from, action.clone()));
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(Self::tx_hash(nonce + 1))
    }

    async fn wait_for_inclusion(&self, tx_hash: TxHash) -> Result<InclusionReceipt> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(reason) = self.revert.lock().unwrap().clone() {
            return Err(Error::TransactionFailed(reason));
        }
        let reverts = self
            .revert_submissions
            .lock()
            .unwrap()
            .iter()
            .any(|&n| Self::tx_hash(n) == tx_hash);
        if reverts {
            return Err(Error::TransactionFailed("execution reverted".to_string()));
        }
        Ok(InclusionReceipt {
            tx_hash,
            block_number: Some(1),
            gas_used: 21_000,
        })
    }

    async fn user_balance(&self, _user: Address) -> Result<U256> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.read_error.lock().unwrap().clone() {
            return Err(Error::ReadFailed(reason));
        }
        Ok(*self.user_balance.lock().unwrap())
    }

    async fn contract_balance(&self) -> Result<U256> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.read_error.lock().unwrap().clone() {
            return Err(Error::ReadFailed(reason));
        }
        Ok(*self.contract_balance.lock().unwrap())
    }
}
