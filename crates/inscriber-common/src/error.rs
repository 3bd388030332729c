//! Error types for the inscriber-common library

use bitcoin::{Amount, Txid};
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which transaction of a plan a broadcast failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRole {
    Commit,
    Reveal(usize),
}

impl fmt::Display for TxRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRole::Commit => write!(f, "commit"),
            TxRole::Reveal(index) => write!(f, "reveal #{index}"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum InscriberError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Address resolution error: {0}")]
    AddressResolution(String),
    #[error("Previous output lookup failed for {outpoint}: {message}")]
    PrevOutput { outpoint: String, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },
    #[error("reveal(index {index}) transaction weight greater than {max}: {weight}")]
    WeightExceeded { index: usize, weight: u64, max: u64 },
    #[error("Signing error: {0}")]
    Signing(String),
    #[error("Cryptography error: {0}")]
    Crypto(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("send {role} tx error: {message}")]
    Broadcast { role: TxRole, message: String },
    #[error(
        "send reveal tx error, {index}: {message} (commit {commit_txid} broadcast, {} accepted)",
        .submitted.len()
    )]
    RevealBroadcast {
        commit_txid: Txid,
        index: usize,
        submitted: Vec<Txid>,
        message: String,
    },
    #[error("Confirmation polling error: {0}")]
    Monitor(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = core::result::Result<T, InscriberError>;

impl From<bitcoin::address::ParseError> for InscriberError {
    fn from(err: bitcoin::address::ParseError) -> Self {
        InscriberError::AddressResolution(format!("{err}"))
    }
}

impl From<bitcoin::address::FromScriptError> for InscriberError {
    fn from(err: bitcoin::address::FromScriptError) -> Self {
        InscriberError::AddressResolution(format!("{err}"))
    }
}

impl From<bitcoin::sighash::TaprootError> for InscriberError {
    fn from(err: bitcoin::sighash::TaprootError) -> Self {
        InscriberError::Signing(format!("{err}"))
    }
}

impl From<bitcoin::sighash::P2wpkhError> for InscriberError {
    fn from(err: bitcoin::sighash::P2wpkhError) -> Self {
        InscriberError::Signing(format!("{err}"))
    }
}

impl From<bitcoin::taproot::TaprootBuilderError> for InscriberError {
    fn from(err: bitcoin::taproot::TaprootBuilderError) -> Self {
        InscriberError::Crypto(format!("{err}"))
    }
}

impl From<bitcoin::consensus::encode::Error> for InscriberError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        InscriberError::Transaction(format!("{err}"))
    }
}

impl From<bitcoin::secp256k1::Error> for InscriberError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        InscriberError::Crypto(format!("{err}"))
    }
}

impl From<bitcoin::key::FromWifError> for InscriberError {
    fn from(err: bitcoin::key::FromWifError) -> Self {
        InscriberError::Crypto(format!("{err}"))
    }
}

impl From<bitcoin::hashes::hex::HexToArrayError> for InscriberError {
    fn from(err: bitcoin::hashes::hex::HexToArrayError) -> Self {
        InscriberError::Serialization(format!("{err}"))
    }
}

impl From<hex::FromHexError> for InscriberError {
    fn from(err: hex::FromHexError) -> Self {
        InscriberError::Serialization(format!("{err}"))
    }
}

impl From<serde_json::Error> for InscriberError {
    fn from(err: serde_json::Error) -> Self {
        InscriberError::Serialization(format!("{err}"))
    }
}

impl From<reqwest::Error> for InscriberError {
    fn from(err: reqwest::Error) -> Self {
        InscriberError::Network(format!("{err}"))
    }
}

impl From<url::ParseError> for InscriberError {
    fn from(err: url::ParseError) -> Self {
        InscriberError::Configuration(format!("invalid URL: {err}"))
    }
}

impl From<std::io::Error> for InscriberError {
    fn from(err: std::io::Error) -> Self {
        InscriberError::Io(format!("{err}"))
    }
}

impl From<core::num::ParseIntError> for InscriberError {
    fn from(err: core::num::ParseIntError) -> Self {
        InscriberError::Serialization(format!("Failed to parse integer: {err}"))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for InscriberError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        InscriberError::Monitor(format!("confirmation watcher dropped: {err}"))
    }
}
