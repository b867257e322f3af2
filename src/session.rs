//! Wallet session management
//!
//! Owns the connection to exactly one wallet account and the contract handle
//! bound to that account's signing capability.
//!
//! States: `Disconnected -> Connecting -> Connected`, with `Connecting`
//! falling back to `Disconnected` when the wallet is missing or the user
//! refuses access. Wallet-side changes (account switch, chain switch,
//! disconnect) tear the session down or rebind it; every transition is
//! published to subscribers.

use crate::contract::ContractHandle;
use crate::wallet::WalletProvider;
use crate::{Error, Result};
use alloy::primitives::Address;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered session events per subscriber before it starts lagging
const EVENT_BUFFER: usize = 64;

/// An authorized connection to one account
#[derive(Debug, Clone)]
pub struct WalletSession {
    account: Address,
    chain_id: u64,
    contract: ContractHandle,
}

impl WalletSession {
    pub fn account(&self) -> Address {
        self.account
    }

    /// Chain the wallet was on when the session was established
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(WalletSession),
}

impl SessionState {
    fn event(&self) -> SessionEvent {
        match self {
            SessionState::Disconnected => SessionEvent::Disconnected,
            SessionState::Connecting => SessionEvent::Connecting,
            SessionState::Connected(session) => SessionEvent::Connected {
                account: session.account,
            },
        }
    }
}

/// Published on every session state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionEvent {
    Disconnected,
    Connecting,
    Connected { account: Address },
}

/// Changes reported by the wallet itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// New account list; the first entry is the selected account
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

struct Inner {
    state: SessionState,
    /// Bumped on every teardown or rebind so a slow `connect` can tell its
    /// result is stale
    epoch: u64,
}

pub struct WalletSessionManager {
    wallet: Arc<dyn WalletProvider>,
    contract_address: Address,
    inner: RwLock<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl WalletSessionManager {
    pub fn new(wallet: Arc<dyn WalletProvider>, contract_address: Address) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            wallet,
            contract_address,
            inner: RwLock::new(Inner {
                state: SessionState::Disconnected,
                epoch: 0,
            }),
            events,
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state.clone()
    }

    /// The connected session, or `NotConnected`
    pub async fn current(&self) -> Result<WalletSession> {
        match &self.inner.read().await.state {
            SessionState::Connected(session) => Ok(session.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    pub async fn account(&self) -> Option<Address> {
        self.current().await.ok().map(|s| s.account)
    }

    /// Request wallet access and bind the contract to the granted account
    ///
    /// Returns the existing session when already connected. A second call
    /// while a connection attempt is in flight fails with `ConnectInProgress`.
    pub async fn connect(&self) -> Result<WalletSession> {
        let epoch = {
            let mut inner = self.inner.write().await;
            match &inner.state {
                SessionState::Connected(session) => return Ok(session.clone()),
                SessionState::Connecting => return Err(Error::ConnectInProgress),
                SessionState::Disconnected => {}
            }
            inner.epoch += 1;
            self.transition(&mut inner, SessionState::Connecting);
            inner.epoch
        };

        let result = self.establish().await;

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            debug!("Session torn down while connecting, discarding grant");
            return Err(Error::NotConnected);
        }

        match result {
            Ok(session) => {
                info!(account = %session.account, contract = %self.contract_address, "Wallet connected");
                self.transition(&mut inner, SessionState::Connected(session.clone()));
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Wallet connection failed");
                self.transition(&mut inner, SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<WalletSession> {
        let accounts = self.wallet.request_accounts().await?;
        let account = *accounts.first().ok_or(Error::UserRejected)?;
        let chain_id = self.wallet.chain_id().await?;
        self.bind(account, chain_id)
    }

    fn bind(&self, account: Address, chain_id: u64) -> Result<WalletSession> {
        let contract = self.wallet.bind_contract(account, self.contract_address)?;
        Ok(WalletSession {
            account,
            chain_id,
            contract,
        })
    }

    /// Tear the session down
    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        self.teardown(&mut inner);
    }

    fn teardown(&self, inner: &mut Inner) {
        if matches!(inner.state, SessionState::Disconnected) {
            return;
        }
        inner.epoch += 1;
        info!("Wallet session closed");
        self.transition(inner, SessionState::Disconnected);
    }

    /// React to a change reported by the wallet
    ///
    /// Never connects on its own: events received while disconnected are
    /// ignored.
    pub async fn handle_wallet_event(&self, event: WalletEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        let current = match &inner.state {
            SessionState::Connected(session) => Some((session.account, session.chain_id)),
            SessionState::Connecting => None,
            SessionState::Disconnected => return Ok(()),
        };
        let Some((current, session_chain)) = current else {
            // An in-flight connect picks up the wallet's answer itself
            if event == WalletEvent::Disconnected {
                self.teardown(&mut inner);
            }
            return Ok(());
        };

        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first() {
                None => {
                    info!("Wallet exposed no accounts");
                    self.teardown(&mut inner);
                }
                Some(&account) if account == current => {}
                Some(&account) => {
                    info!(from = %current, to = %account, "Wallet account changed");
                    match self.bind(account, session_chain) {
                        Ok(session) => {
                            inner.epoch += 1;
                            self.transition(&mut inner, SessionState::Connected(session));
                        }
                        Err(e) => {
                            self.teardown(&mut inner);
                            return Err(e);
                        }
                    }
                }
            },
            WalletEvent::ChainChanged(chain_id) if chain_id == session_chain => {}
            WalletEvent::ChainChanged(chain_id) => {
                info!(from = session_chain, to = chain_id, "Wallet switched chain");
                self.teardown(&mut inner);
            }
            WalletEvent::Disconnected => self.teardown(&mut inner),
        }
        Ok(())
    }

    fn transition(&self, inner: &mut Inner, next: SessionState) {
        inner.state = next;
        // No receivers is fine
        let _ = self.events.send(inner.state.event());
    }

    /// Stream of session events
    ///
    /// Starts with the current state, then yields every later transition.
    /// Never ends while the manager is alive; call again to restart.
    pub async fn subscribe(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        // Subscribing under the read lock keeps the snapshot and the
        // receiver in step: transitions publish under the write lock.
        let inner = self.inner.read().await;
        let rx = self.events.subscribe();
        let current = inner.state.event();
        drop(inner);

        stream::once(async move { current }).chain(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }))
    }

    /// Poll the wallet for account and chain changes
    ///
    /// HTTP wallets cannot push `accountsChanged`/`chainChanged`, so each
    /// poll is compared against the connected session. Poll errors are
    /// logged and retried on the next tick; they never tear the session down.
    pub fn watch_wallet(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Ok(session) = manager.current().await else {
                    continue;
                };

                match manager.wallet.chain_id().await {
                    Ok(chain_id) if chain_id != session.chain_id => {
                        if let Err(e) = manager
                            .handle_wallet_event(WalletEvent::ChainChanged(chain_id))
                            .await
                        {
                            warn!(error = %e, "Failed to apply chain change");
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to poll wallet chain");
                        continue;
                    }
                }

                match manager.wallet.accounts().await {
                    Ok(accounts) => {
                        if let Err(e) = manager
                            .handle_wallet_event(WalletEvent::AccountsChanged(accounts))
                            .await
                        {
                            warn!(error = %e, "Failed to apply account change");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to poll wallet accounts"),
                }
            }
        })
    }
}
