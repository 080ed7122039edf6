//! Error types for utxochain

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Sender and recipient cannot be the same address")]
    SameAddress,

    #[error("Insufficient funds: requested {requested}, spendable {available}")]
    InsufficientFunds { requested: u64, available: u128 },

    #[error("Referenced output {txid}:{vout} not found")]
    MissingReferencedOutput { txid: String, vout: u32 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("Block parent is no longer the chain tip")]
    StaleParent,

    #[error("No blockchain found for chain id {0}")]
    ChainNotFound(String),

    #[error("Blockchain already exists for chain id {0}")]
    ChainAlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Orphan block: parent {0} is unknown")]
    OrphanBlock(String),

    #[error("No wallet found for address {0}")]
    WalletNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
