//! Wallet access
//!
//! The wallet holds keys and authorizes transactions. This module exposes it
//! through the `WalletProvider` trait; private keys, when held locally, never
//! leave `SecureWallet`.

mod provider;
mod signer;

pub use provider::{RpcWallet, WalletProvider};
pub use signer::SecureWallet;
