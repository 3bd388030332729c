//! Esplora REST client
//!
//! Implements every collaborator trait against a mempool.space style Esplora
//! API:
//! - `GET /address/{address}/utxo`
//! - `GET /tx/{txid}/hex`
//! - `POST /tx`
//! - `GET /tx/{txid}/status` and `GET /blocks/tip/height`

use crate::traits::{
    BroadcastProvider, ConfirmationProvider, PrevOutputProvider, UnspentOutput, UtxoProvider,
};
use crate::{InscriberError, Result};
use async_trait::async_trait;
use bitcoin::consensus::deserialize;
use bitcoin::{Address, Amount, OutPoint, Transaction, TxOut, Txid};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraTransactionStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

impl EsploraTransactionStatus {
    /// Confirmation depth given the current chain tip height
    pub fn confirmations(&self, tip_height: u32) -> u32 {
        match (self.confirmed, self.block_height) {
            (true, Some(height)) if tip_height >= height => tip_height - height + 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub status: EsploraTransactionStatus,
    pub value: u64,
}

pub struct EsploraClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("[EsploraClient] GET {}", url);
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(InscriberError::Network(format!("GET {url} returned {status}: {text}")));
        }
        Ok(text)
    }

    pub async fn get_transaction(&self, txid: &Txid) -> Result<Transaction> {
        let tx_hex = self.get_text(&format!("/tx/{txid}/hex")).await?;
        let bytes = hex::decode(tx_hex.trim())?;
        Ok(deserialize(&bytes)?)
    }

    pub async fn get_tx_status(&self, txid: &Txid) -> Result<EsploraTransactionStatus> {
        let text = self.get_text(&format!("/tx/{txid}/status")).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn get_tip_height(&self) -> Result<u32> {
        let text = self.get_text("/blocks/tip/height").await?;
        Ok(text.trim().parse::<u32>()?)
    }
}

/// Output `outpoint.vout` of `tx`
pub fn output_at(tx: &Transaction, outpoint: &OutPoint) -> Result<TxOut> {
    tx.output
        .get(outpoint.vout as usize)
        .cloned()
        .ok_or_else(|| InscriberError::PrevOutput {
            outpoint: outpoint.to_string(),
            message: format!("transaction has only {} outputs", tx.output.len()),
        })
}

#[async_trait]
impl UtxoProvider for EsploraClient {
    async fn list_unspent(&self, address: &Address) -> Result<Vec<UnspentOutput>> {
        let text = self.get_text(&format!("/address/{address}/utxo")).await?;
        let utxos: Vec<EsploraUtxo> = serde_json::from_str(&text)?;
        let script_pubkey = address.script_pubkey();
        utxos
            .into_iter()
            .map(|utxo| {
                Ok(UnspentOutput {
                    outpoint: OutPoint {
                        txid: Txid::from_str(&utxo.txid)?,
                        vout: utxo.vout,
                    },
                    output: TxOut {
                        value: Amount::from_sat(utxo.value),
                        script_pubkey: script_pubkey.clone(),
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl PrevOutputProvider for EsploraClient {
    async fn get_previous_output(&self, outpoint: &OutPoint) -> Result<TxOut> {
        let tx = self
            .get_transaction(&outpoint.txid)
            .await
            .map_err(|e| InscriberError::PrevOutput {
                outpoint: outpoint.to_string(),
                message: e.to_string(),
            })?;
        output_at(&tx, outpoint)
    }
}

#[async_trait]
impl BroadcastProvider for EsploraClient {
    async fn broadcast_transaction(&self, tx_hex: String) -> Result<Txid> {
        let url = format!("{}/tx", self.base_url);
        log::debug!("[EsploraClient] POST {}", url);
        let response = self.http_client.post(&url).body(tx_hex).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(InscriberError::Network(format!("broadcast rejected ({status}): {text}")));
        }
        Ok(Txid::from_str(text.trim())?)
    }
}

#[async_trait]
impl ConfirmationProvider for EsploraClient {
    async fn get_confirmations(&self, txid: &Txid) -> Result<u32> {
        let status = self.get_tx_status(txid).await?;
        if !status.confirmed {
            return Ok(0);
        }
        let tip = self.get_tip_height().await?;
        Ok(status.confirmations(tip))
    }
}
