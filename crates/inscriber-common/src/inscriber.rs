//! End-to-end planning of a commit/reveal inscription
//!
//! `InscriptionRequest` carries every planning parameter. `plan` runs the
//! synchronous stages (envelopes, reveal skeleton, commit, link) and
//! `build` adds funding resolution and commit signing around it.

use crate::address::{decode_address, funding_address_for_key};
use crate::commit::{build_commit, CommitParams, FundingInput};
use crate::envelope::{derive_envelopes, DataItem, RevealKeyMode};
use crate::finalize::{link_and_sign_reveals, FinalizedInscription, LinkedPlan};
use crate::network::InscriberNetwork;
use crate::reveal::{plan_reveals, RevealMode, RevealParams, DEFAULT_REVEAL_OUT_VALUE};
use crate::signer::CommitSigner;
use crate::traits::{PrevOutputProvider, UtxoProvider};
use crate::{InscriberError, Result};
use bitcoin::key::PrivateKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Amount, Network, OutPoint};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Highest fee rate, in sat/vB, a request may ask for
pub const MAX_FEE_RATE: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InscriptionRequest {
    pub network: InscriberNetwork,
    pub items: Vec<DataItem>,
    /// Outpoints funding the commit transaction, in input order
    pub funding: Vec<OutPoint>,
    /// Reveal fee rate in sat/vB
    pub fee_rate: u64,
    /// Commit fee rate in sat/vB
    pub commit_fee_rate: u64,
    /// Carried value for items without an explicit amount
    pub reveal_out_value: u64,
    pub reveal_mode: RevealMode,
    pub key_mode: RevealKeyMode,
    pub rbf: bool,
    pub change_address: Option<String>,
}

impl Default for InscriptionRequest {
    fn default() -> Self {
        Self {
            network: InscriberNetwork::default(),
            items: vec![],
            funding: vec![],
            fee_rate: 1,
            commit_fee_rate: 1,
            reveal_out_value: DEFAULT_REVEAL_OUT_VALUE,
            reveal_mode: RevealMode::default(),
            key_mode: RevealKeyMode::default(),
            rbf: false,
            change_address: None,
        }
    }
}

impl InscriptionRequest {
    pub fn network(&self) -> Network {
        self.network.into()
    }

    /// Reject requests that cannot produce a plan, before any key is generated
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(InscriberError::InvalidParameters("no data items".to_string()));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.destination.trim().is_empty() {
                return Err(InscriberError::InvalidParameters(format!(
                    "data item {index} has no destination"
                )));
            }
            item.payload.check_push_sizes()?;
            if item.amount.is_some_and(|amount| amount > Amount::MAX_MONEY.to_sat()) {
                return Err(InscriberError::InvalidParameters(format!(
                    "data item {index} carries more than {}",
                    Amount::MAX_MONEY
                )));
            }
        }
        if self.reveal_out_value > Amount::MAX_MONEY.to_sat() {
            return Err(InscriberError::InvalidParameters(format!(
                "reveal output value {} exceeds {}",
                self.reveal_out_value,
                Amount::MAX_MONEY
            )));
        }
        let rates = [("fee rate", self.fee_rate), ("commit fee rate", self.commit_fee_rate)];
        for (name, rate) in rates {
            if rate > MAX_FEE_RATE {
                return Err(InscriberError::InvalidParameters(format!(
                    "{name} {rate} sat/vB is above the {MAX_FEE_RATE} sat/vB limit"
                )));
            }
        }
        Ok(())
    }

    /// Value carried by each item's reveal output
    pub fn carried_values(&self) -> Vec<Amount> {
        self.items
            .iter()
            .map(|item| Amount::from_sat(item.amount.unwrap_or(self.reveal_out_value)))
            .collect()
    }

    /// Run every synchronous planning stage against resolved funding.
    pub fn plan<R: RngCore + CryptoRng + ?Sized>(
        &self,
        funding: &[FundingInput],
        rng: &mut R,
    ) -> Result<LinkedPlan> {
        self.validate()?;
        if funding.is_empty() {
            return Err(InscriberError::InvalidParameters("no funding inputs".to_string()));
        }
        let network = self.network();
        let secp = Secp256k1::new();

        let change_script = self
            .change_address
            .as_deref()
            .map(|address| decode_address(address, network))
            .transpose()?;

        let envelopes = derive_envelopes(&secp, &self.items, network, self.key_mode, rng)?;
        let destinations = self
            .items
            .iter()
            .map(|item| item.destination.clone())
            .collect::<Vec<_>>();
        let skeleton = plan_reveals(
            &envelopes,
            &destinations,
            &self.carried_values(),
            network,
            &RevealParams {
                fee_rate: self.fee_rate,
                mode: self.reveal_mode,
                rbf: self.rbf,
            },
        )?;
        let commit = build_commit(
            funding,
            &envelopes,
            &skeleton,
            &CommitParams {
                fee_rate: self.commit_fee_rate,
                rbf: self.rbf,
                change_script,
            },
        )?;
        link_and_sign_reveals(&secp, envelopes, skeleton, commit)
    }

    /// Resolve `self.funding`, plan, and sign the commit transaction.
    pub async fn build<P, R>(
        &self,
        provider: &P,
        signer: &dyn CommitSigner,
        rng: &mut R,
    ) -> Result<FinalizedInscription>
    where
        P: PrevOutputProvider + ?Sized,
        R: RngCore + CryptoRng + Send + ?Sized,
    {
        self.validate()?;
        let funding = resolve_funding(provider, &self.funding).await?;
        let linked = self.plan(&funding, rng)?;
        linked.sign_commit(signer).await
    }
}

/// Resolve each funding outpoint to the output it spends, in order.
pub async fn resolve_funding<P: PrevOutputProvider + ?Sized>(
    provider: &P,
    outpoints: &[OutPoint],
) -> Result<Vec<FundingInput>> {
    if outpoints.is_empty() {
        return Err(InscriberError::InvalidParameters("no funding outpoints".to_string()));
    }
    let mut funding = Vec::with_capacity(outpoints.len());
    for outpoint in outpoints {
        let txout = provider.get_previous_output(outpoint).await?;
        log::debug!("Funding input {} worth {}", outpoint, txout.value);
        funding.push(FundingInput {
            outpoint: *outpoint,
            txout,
        });
    }
    Ok(funding)
}

/// Every unspent output of `key`'s key-path P2TR address.
pub async fn collect_funding<P: UtxoProvider + ?Sized>(
    provider: &P,
    key: &PrivateKey,
    network: Network,
) -> Result<Vec<FundingInput>> {
    let secp = Secp256k1::new();
    let address = funding_address_for_key(&secp, key, network);
    let utxos = provider.list_unspent(&address).await?;
    if utxos.is_empty() {
        return Err(InscriberError::InvalidParameters(format!(
            "no spendable outputs at {address}"
        )));
    }
    log::info!("Found {} funding output(s) at {}", utxos.len(), address);
    Ok(utxos
        .into_iter()
        .map(|utxo| FundingInput {
            outpoint: utxo.outpoint,
            txout: utxo.output,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_empty_json() {
        let request: InscriptionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.reveal_out_value, DEFAULT_REVEAL_OUT_VALUE);
        assert_eq!(request.reveal_mode, RevealMode::Isolated);
        assert_eq!(request.key_mode, RevealKeyMode::Independent);
        assert!(!request.rbf);
    }

    #[test]
    fn test_carried_values_fall_back_to_reveal_out_value() {
        let request = InscriptionRequest {
            items: vec![
                DataItem::inscription("a", "text/plain", vec![1]),
                DataItem::transfer("b", 10_000),
            ],
            reveal_out_value: 600,
            ..Default::default()
        };
        assert_eq!(
            request.carried_values(),
            vec![Amount::from_sat(600), Amount::from_sat(10_000)]
        );
    }

    #[test]
    fn test_validate_rejects_empty_items_and_destinations() {
        assert!(InscriptionRequest::default().validate().is_err());
        let request = InscriptionRequest {
            items: vec![DataItem::transfer(" ", 1_000)],
            ..Default::default()
        };
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_amounts_and_rates() {
        let valid = InscriptionRequest {
            items: vec![DataItem::transfer("b", 10_000)],
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let mut request = valid.clone();
        request.items = vec![DataItem::transfer("b", Amount::MAX_MONEY.to_sat() + 1)];
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));

        let mut request = valid.clone();
        request.reveal_out_value = u64::MAX;
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));

        let mut request = valid.clone();
        request.fee_rate = MAX_FEE_RATE + 1;
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));

        let mut request = valid;
        request.commit_fee_rate = u64::MAX / 100;
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_content_type() {
        let request = InscriptionRequest {
            items: vec![DataItem::inscription("a", "x".repeat(600), vec![1])],
            ..Default::default()
        };
        assert!(matches!(request.validate(), Err(InscriberError::InvalidParameters(_))));
    }
}
