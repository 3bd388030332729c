//! Collaborator traits for the commit/reveal pipeline
//!
//! The planner itself never talks to the network. Everything that has to
//! reach a node or an indexer goes through one of these traits so the same
//! pipeline can run against the Esplora client, a wallet RPC, or the mock
//! provider used in tests:
//! - `UtxoProvider`: funding source listing
//! - `PrevOutputProvider`: previous output resolution by outpoint
//! - `BroadcastProvider`: raw transaction submission
//! - `ConfirmationProvider`: confirmation depth polling
//! - `ExternalSigner`: delegated commit transaction signing

use crate::Result;
use async_trait::async_trait;
use bitcoin::{Address, OutPoint, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};

/// An unspent output owned by a funding address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub output: TxOut,
}

/// Result of handing a transaction to an external signer
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    /// `false` when the signer could not produce every input's witness
    pub complete: bool,
}

#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// List the unspent outputs locked to `address`
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>>;
}

#[async_trait]
pub trait PrevOutputProvider: Send + Sync {
    /// Fetch the output an outpoint refers to (value and locking script)
    async fn get_previous_output(&self, outpoint: &OutPoint) -> Result<TxOut>;
}

#[async_trait]
pub trait BroadcastProvider: Send + Sync {
    /// Submit a hex-encoded raw transaction and return its txid
    async fn broadcast_transaction(&self, tx_hex: String) -> Result<Txid>;
}

#[async_trait]
pub trait ConfirmationProvider: Send + Sync {
    /// Number of confirmations of `txid`, 0 while unconfirmed
    async fn get_confirmations(&self, txid: &Txid) -> Result<u32>;
}

#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Sign every input of `tx`. `prevouts[i]` is the output spent by input `i`.
    async fn sign_raw_transaction(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<SignedTransaction>;
}

/// Combined provider trait covering every network-facing collaborator
pub trait InscriberProvider:
    UtxoProvider + PrevOutputProvider + BroadcastProvider + ConfirmationProvider
{
}

impl<T> InscriberProvider for T where
    T: UtxoProvider + PrevOutputProvider + BroadcastProvider + ConfirmationProvider
{
}
