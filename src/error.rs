//! Error types for the VPN marketplace client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No wallet available")]
    WalletUnavailable,

    #[error("Wallet access request was rejected")]
    UserRejected,

    #[error("Wallet is not connected")]
    NotConnected,

    #[error("A wallet connection is already in progress")]
    ConnectInProgress,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Text shown to the user when an action fails
    pub fn user_message(&self) -> String {
        match self {
            Error::WalletUnavailable => {
                "No wallet found. Please install a wallet or set WALLET_RPC_URL / PRIVATE_KEY."
                    .to_string()
            }
            Error::UserRejected => "Wallet access was not granted.".to_string(),
            Error::NotConnected => "Connect your wallet first.".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
