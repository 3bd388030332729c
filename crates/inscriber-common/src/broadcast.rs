//! Broadcast orchestration
//!
//! Immediate protocol: submit the commit, then every reveal.
//!
//! Staged protocol: submit the commit, wait until it has more than
//! `required_confirmations` confirmations, then submit the reveals. The wait
//! runs on a background task that hands its result back over a oneshot
//! channel; a per-orchestrator gate admits one staged wait at a time.

use crate::error::TxRole;
use crate::finalize::FinalizedInscription;
use crate::traits::{BroadcastProvider, ConfirmationProvider};
use crate::{InscriberError, Result};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Amount, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BroadcastProtocol {
    #[default]
    Immediate,
    Staged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_secs: u64,
    /// Reveals go out once the commit has strictly more confirmations than this
    pub required_confirmations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub commit_txid: Txid,
    pub reveal_txids: Vec<Txid>,
    pub fees: Amount,
    /// Commit confirmations observed before revealing (staged protocol only)
    pub confirmations: Option<u32>,
}

pub struct BroadcastOrchestrator<P: ?Sized> {
    provider: Arc<P>,
    config: OrchestratorConfig,
    gate: Mutex<()>,
}

impl<P> BroadcastOrchestrator<P>
where
    P: BroadcastProvider + ConfirmationProvider + ?Sized + 'static,
{
    pub fn new(provider: Arc<P>, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            config,
            gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn broadcast(
        &self,
        plan: &FinalizedInscription,
        protocol: BroadcastProtocol,
    ) -> Result<BroadcastReport> {
        match protocol {
            BroadcastProtocol::Immediate => self.broadcast_immediate(plan).await,
            BroadcastProtocol::Staged => self.broadcast_staged(plan).await,
        }
    }

    pub async fn broadcast_immediate(
        &self,
        plan: &FinalizedInscription,
    ) -> Result<BroadcastReport> {
        let fees = plan.total_fees();
        let commit_txid = self.submit_commit(plan.commit_transaction()).await?;
        let reveal_txids = self.submit_reveals(commit_txid, plan.reveal_transactions()).await?;
        Ok(BroadcastReport {
            commit_txid,
            reveal_txids,
            fees,
            confirmations: None,
        })
    }

    pub async fn broadcast_staged(&self, plan: &FinalizedInscription) -> Result<BroadcastReport> {
        let fees = plan.total_fees();
        let commit_txid = self.submit_commit(plan.commit_transaction()).await?;

        let _slot = self.gate.lock().await;
        let confirmations = self.wait_for_confirmations(commit_txid).await?;
        let reveal_txids = self.submit_reveals(commit_txid, plan.reveal_transactions()).await?;
        Ok(BroadcastReport {
            commit_txid,
            reveal_txids,
            fees,
            confirmations: Some(confirmations),
        })
    }

    /// Block until `txid` has more than `required_confirmations` confirmations.
    ///
    /// Polling runs on a spawned task; the first poll happens one interval
    /// after the call. A polling error ends the wait with that error.
    pub async fn wait_for_confirmations(&self, txid: Txid) -> Result<u32> {
        let provider = Arc::clone(&self.provider);
        let interval = self.config.poll_interval();
        let threshold = self.config.required_confirmations;
        let (tx, rx) = oneshot::channel();

        log::info!("Waiting for commit {txid} to reach more than {threshold} confirmation(s)");
        tokio::spawn(async move {
            let result: Result<u32> = async {
                loop {
                    tokio::time::sleep(interval).await;
                    let confirmations = provider.get_confirmations(&txid).await?;
                    log::info!("Commit {txid}: {confirmations} confirmation(s)");
                    if confirmations > threshold {
                        return Ok(confirmations);
                    }
                }
            }
            .await;
            // The waiter may have gone away, nothing left to notify
            let _ = tx.send(result);
        });

        rx.await?
    }

    async fn submit_commit(&self, commit: &Transaction) -> Result<Txid> {
        let txid = self
            .provider
            .broadcast_transaction(serialize_hex(commit))
            .await
            .map_err(|e| InscriberError::Broadcast {
                role: TxRole::Commit,
                message: e.to_string(),
            })?;
        if txid != commit.compute_txid() {
            log::warn!("Broadcaster returned {txid} for commit {}", commit.compute_txid());
        }
        log::info!("Commit transaction broadcast: {txid}");
        Ok(txid)
    }

    /// Submit reveals in order, stopping at the first rejection.
    pub async fn submit_reveals(
        &self,
        commit_txid: Txid,
        reveals: &[Transaction],
    ) -> Result<Vec<Txid>> {
        let mut submitted = Vec::with_capacity(reveals.len());
        for (index, reveal) in reveals.iter().enumerate() {
            match self.provider.broadcast_transaction(serialize_hex(reveal)).await {
                Ok(txid) => {
                    log::info!("Reveal transaction #{index} broadcast: {txid}");
                    submitted.push(txid);
                }
                Err(e) => {
                    log::error!(
                        "Reveal #{index} rejected after commit {commit_txid}, \
                         funds remain in the commitment outputs"
                    );
                    return Err(InscriberError::RevealBroadcast {
                        commit_txid,
                        index,
                        submitted,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"required_confirmations": 1}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.required_confirmations, 1);
    }
}
