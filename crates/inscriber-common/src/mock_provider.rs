//! In-memory provider for tests
//!
//! Holds funding outputs, previous outputs and broadcast transactions behind
//! `Arc<Mutex<..>>` so clones share state. Every confirmation poll mines one
//! block on top of the polled transaction, giving increasing confirmation
//! counts for the staged protocol.

use crate::signer::{CommitSigner, LocalSigner};
use crate::traits::*;
use crate::{InscriberError, Result};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::PrivateKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A transaction accepted by the mock broadcaster
#[derive(Debug, Clone)]
pub struct BroadcastRecord {
    pub txid: Txid,
    pub tx_hex: String,
    /// Highest confirmation count any poll had reported when this was accepted
    pub confirmations_seen: u32,
}

#[derive(Clone)]
pub struct MockProvider {
    pub network: Network,
    pub funding_key: PrivateKey,
    pub utxos: Arc<Mutex<HashMap<Address, Vec<UnspentOutput>>>>,
    pub prev_outputs: Arc<Mutex<HashMap<OutPoint, TxOut>>>,
    pub broadcasted_txs: Arc<Mutex<Vec<BroadcastRecord>>>,
    pub confirmations: Arc<Mutex<HashMap<Txid, u32>>>,
    pub polls: Arc<Mutex<u32>>,
    /// Reject the broadcast with this zero-based index
    pub reject_broadcast_at: Arc<Mutex<Option<usize>>>,
    pub fail_polling: Arc<Mutex<bool>>,
    /// Report external signing as incomplete
    pub incomplete_signing: Arc<Mutex<bool>>,
    funding_counter: Arc<Mutex<u32>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(Network::Regtest)
    }
}

impl MockProvider {
    pub fn new(network: Network) -> Self {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
        Self::with_key(PrivateKey::new(secret_key, network), network)
    }

    pub fn with_key(funding_key: PrivateKey, network: Network) -> Self {
        Self {
            network,
            funding_key,
            utxos: Arc::new(Mutex::new(HashMap::new())),
            prev_outputs: Arc::new(Mutex::new(HashMap::new())),
            broadcasted_txs: Arc::new(Mutex::new(vec![])),
            confirmations: Arc::new(Mutex::new(HashMap::new())),
            polls: Arc::new(Mutex::new(0)),
            reject_broadcast_at: Arc::new(Mutex::new(None)),
            fail_polling: Arc::new(Mutex::new(false)),
            incomplete_signing: Arc::new(Mutex::new(false)),
            funding_counter: Arc::new(Mutex::new(0)),
        }
    }

    /// Key-path P2TR address of the funding key
    pub fn funding_address(&self) -> Address {
        let secp = Secp256k1::new();
        crate::address::funding_address_for_key(&secp, &self.funding_key, self.network)
    }

    /// Create a confirmed output of `value` at the funding address.
    pub fn fund(&self, value: u64) -> OutPoint {
        let mut counter = self.funding_counter.lock().unwrap();
        *counter += 1;
        let address = self.funding_address();
        let output = TxOut {
            value: Amount::from_sat(value),
            script_pubkey: address.script_pubkey(),
        };
        // Unique coinbase-like parent so every funding output gets its own txid
        let parent = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(counter.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![output.clone()],
        };
        let outpoint = OutPoint::new(parent.compute_txid(), 0);
        self.prev_outputs.lock().unwrap().insert(outpoint, output.clone());
        self.utxos
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push(UnspentOutput { outpoint, output });
        outpoint
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.broadcasted_txs.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> u32 {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl UtxoProvider for MockProvider {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>> {
        Ok(self.utxos.lock().unwrap().get(address).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PrevOutputProvider for MockProvider {
    async fn get_previous_output(&self, outpoint: &OutPoint) -> Result<TxOut> {
        self.prev_outputs
            .lock()
            .unwrap()
            .get(outpoint)
            .cloned()
            .ok_or_else(|| InscriberError::PrevOutput {
                outpoint: outpoint.to_string(),
                message: "unknown outpoint".to_string(),
            })
    }
}

#[async_trait]
impl BroadcastProvider for MockProvider {
    async fn broadcast_transaction(&self, tx_hex: String) -> Result<Txid> {
        let tx_bytes = hex::decode(&tx_hex)?;
        let tx: Transaction = bitcoin::consensus::deserialize(&tx_bytes)?;
        let txid = tx.compute_txid();

        let mut broadcasted = self.broadcasted_txs.lock().unwrap();
        if *self.reject_broadcast_at.lock().unwrap() == Some(broadcasted.len()) {
            return Err(InscriberError::Network(format!("mock rejected {txid}")));
        }

        let mut prev_outputs = self.prev_outputs.lock().unwrap();
        for (vout, output) in tx.output.iter().enumerate() {
            prev_outputs.insert(OutPoint::new(txid, vout as u32), output.clone());
        }
        let confirmations_seen =
            self.confirmations.lock().unwrap().values().copied().max().unwrap_or(0);
        broadcasted.push(BroadcastRecord {
            txid,
            tx_hex,
            confirmations_seen,
        });
        Ok(txid)
    }
}

#[async_trait]
impl ConfirmationProvider for MockProvider {
    async fn get_confirmations(&self, txid: &Txid) -> Result<u32> {
        *self.polls.lock().unwrap() += 1;
        if *self.fail_polling.lock().unwrap() {
            return Err(InscriberError::Network("mock status endpoint unavailable".to_string()));
        }
        let mut confirmations = self.confirmations.lock().unwrap();
        let entry = confirmations.entry(*txid).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}

#[async_trait]
impl ExternalSigner for MockProvider {
    async fn sign_raw_transaction(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<SignedTransaction> {
        if *self.incomplete_signing.lock().unwrap() {
            return Ok(SignedTransaction {
                transaction: tx.clone(),
                complete: false,
            });
        }
        let signer = LocalSigner::new(vec![self.funding_key; tx.input.len()]);
        Ok(SignedTransaction {
            transaction: signer.sign_commit(tx, prevouts).await?,
            complete: true,
        })
    }
}

/// A txid that no mock transaction will ever have
pub fn unknown_txid() -> Txid {
    Txid::from_byte_array([0xee; 32])
}
