//! Decentralized VPN marketplace client
//!
//! Connects a user's wallet to the pay-per-session VPN marketplace contract
//! and drives its transactions:
//! - Wallet session lifecycle (connect, account/chain changes, disconnect)
//! - Validated, signed contract actions with inclusion tracking
//! - Balance reads for display
//!
//! The contract is the source of truth. Nothing here is persisted except the
//! optional transaction audit log.

pub mod audit;
pub mod config;
pub mod contract;
pub mod gateway;
pub mod session;
pub mod units;
pub mod wallet;

mod error;

#[cfg(test)]
mod mock;

// Re-export commonly used types
pub use audit::AuditLog;
pub use config::{Config, RpcConfig};
pub use contract::{ContractAction, ContractMethod};
pub use error::{Error, Result};
pub use gateway::{ActionRequest, BalanceKind, ContractActionGateway, PendingTransaction, TxStatus};
pub use session::{SessionEvent, SessionState, WalletEvent, WalletSessionManager};
pub use units::EtherAmount;
