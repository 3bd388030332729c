//! Linking and finalization
//!
//! Once the commit transaction has its final unsigned form its txid is
//! fixed (segwit signatures do not change it). `link_and_sign_reveals`
//! substitutes that txid into every reveal input, signs each reveal input
//! along the leaf script path and enforces the standard weight limit.
//! `LinkedPlan::sign_commit` then signs the commit transaction and checks
//! that the txid the reveals depend on survived signing.

use crate::address::rawtr_descriptor;
use crate::commit::CommitPlan;
use crate::envelope::EnvelopeContext;
use crate::reveal::RevealSkeleton;
use crate::signer::CommitSigner;
use crate::{InscriberError, Result};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::policy::MAX_STANDARD_TX_WEIGHT;
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::{Amount, OutPoint, Transaction, TxOut, Txid};
use std::collections::HashMap;

/// Reveal transactions signed against the unsigned commit transaction
#[derive(Debug, Clone)]
pub struct LinkedPlan {
    envelopes: Vec<EnvelopeContext>,
    commit: Transaction,
    commit_prevouts: Vec<TxOut>,
    commit_txid: Txid,
    reveals: Vec<Transaction>,
}

impl LinkedPlan {
    pub fn commit_txid(&self) -> Txid {
        self.commit_txid
    }

    pub fn unsigned_commit(&self) -> &Transaction {
        &self.commit
    }

    pub fn reveals(&self) -> &[Transaction] {
        &self.reveals
    }

    /// Sign the commit transaction and seal the plan.
    pub async fn sign_commit(self, signer: &dyn CommitSigner) -> Result<FinalizedInscription> {
        let signed = signer.sign_commit(&self.commit, &self.commit_prevouts).await?;
        let signed_txid = signed.compute_txid();
        if signed_txid != self.commit_txid {
            return Err(InscriberError::Signing(format!(
                "commit txid changed during signing ({} -> {signed_txid}), \
                 reveals would spend a stale hash",
                self.commit_txid
            )));
        }
        log::info!("Commit transaction {} signed", signed_txid);

        Ok(FinalizedInscription {
            envelopes: self.envelopes,
            commit: signed,
            commit_prevouts: self.commit_prevouts,
            reveals: self.reveals,
        })
    }
}

/// Rewrite reveal inputs to the commit txid, then sign and weight-check them.
pub fn link_and_sign_reveals<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    envelopes: Vec<EnvelopeContext>,
    skeleton: RevealSkeleton,
    commit: CommitPlan,
) -> Result<LinkedPlan> {
    if envelopes.len() != skeleton.item_count() || envelopes.len() != commit.commitment_count() {
        return Err(InscriberError::InvalidParameters(format!(
            "{} envelopes, {} reveal outputs, {} commitment outputs",
            envelopes.len(),
            skeleton.item_count(),
            commit.commitment_count()
        )));
    }

    let positions = (0..envelopes.len())
        .map(|item| skeleton.position(item))
        .collect::<Vec<_>>();
    let (commit_tx, commit_prevouts) = commit.into_parts();
    let commit_txid = commit_tx.compute_txid();
    let mut reveals = skeleton.into_transactions();

    // Every commitment output, keyed by the outpoint reveals spend
    let mut commitment_outputs = HashMap::with_capacity(envelopes.len());
    for (item, (tx_index, input_index)) in positions.iter().enumerate() {
        let outpoint = OutPoint {
            txid: commit_txid,
            vout: item as u32,
        };
        reveals[*tx_index].input[*input_index].previous_output = outpoint;
        commitment_outputs.insert(outpoint, commit_tx.output[item].clone());
    }
    log::info!("Linked {} reveal transaction(s) to commit {}", reveals.len(), commit_txid);

    let mut witnesses = Vec::with_capacity(envelopes.len());
    for (item, envelope) in envelopes.iter().enumerate() {
        let (tx_index, input_index) = positions[item];
        let reveal = &reveals[tx_index];
        let prevouts = reveal
            .input
            .iter()
            .map(|input| {
                commitment_outputs
                    .get(&input.previous_output)
                    .cloned()
                    .ok_or_else(|| InscriberError::PrevOutput {
                        outpoint: input.previous_output.to_string(),
                        message: "not a commitment output".to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let sighash = SighashCache::new(reveal).taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(&prevouts),
            envelope.leaf_hash(),
            TapSighashType::Default,
        )?;
        let signature = secp.sign_schnorr_no_aux_rand(&Message::from(sighash), envelope.keypair());
        witnesses.push(envelope.reveal_witness(&signature.serialize()));
    }

    for (item, witness) in witnesses.into_iter().enumerate() {
        let (tx_index, input_index) = positions[item];
        reveals[tx_index].input[input_index].witness = witness;
    }

    for (index, reveal) in reveals.iter().enumerate() {
        let weight = reveal.weight().to_wu();
        if weight > MAX_STANDARD_TX_WEIGHT as u64 {
            return Err(InscriberError::WeightExceeded {
                index,
                weight,
                max: MAX_STANDARD_TX_WEIGHT as u64,
            });
        }
    }

    Ok(LinkedPlan {
        envelopes,
        commit: commit_tx,
        commit_prevouts,
        commit_txid,
        reveals,
    })
}

/// Fully signed commit and reveal transactions, ready to broadcast
#[derive(Debug, Clone)]
pub struct FinalizedInscription {
    envelopes: Vec<EnvelopeContext>,
    commit: Transaction,
    commit_prevouts: Vec<TxOut>,
    reveals: Vec<Transaction>,
}

impl FinalizedInscription {
    pub fn envelopes(&self) -> &[EnvelopeContext] {
        &self.envelopes
    }

    pub fn commit_transaction(&self) -> &Transaction {
        &self.commit
    }

    pub fn commit_txid(&self) -> Txid {
        self.commit.compute_txid()
    }

    pub fn commit_hex(&self) -> String {
        serialize_hex(&self.commit)
    }

    pub fn reveal_transactions(&self) -> &[Transaction] {
        &self.reveals
    }

    pub fn reveal_txids(&self) -> Vec<Txid> {
        self.reveals.iter().map(Transaction::compute_txid).collect()
    }

    pub fn reveal_hexes(&self) -> Vec<String> {
        self.reveals.iter().map(serialize_hex).collect()
    }

    /// Commitment address of each item
    pub fn commit_addresses(&self) -> Vec<String> {
        self.envelopes
            .iter()
            .map(|envelope| envelope.commit_address().to_string())
            .collect()
    }

    /// WIF of the key that can key-path spend each commitment output
    pub fn recovery_wifs(&self) -> Vec<String> {
        self.envelopes
            .iter()
            .map(|envelope| envelope.recovery_key().to_wif())
            .collect()
    }

    /// `rawtr(<wif>)#checksum` descriptor of each recovery key
    pub fn recovery_descriptors(&self) -> Result<Vec<String>> {
        self.envelopes
            .iter()
            .map(|envelope| rawtr_descriptor(envelope.recovery_key()))
            .collect()
    }

    pub fn commit_fee(&self) -> Amount {
        let input: Amount = self.commit_prevouts.iter().map(|p| p.value).sum();
        let output: Amount = self.commit.output.iter().map(|o| o.value).sum();
        input - output
    }

    /// Fee paid by each reveal transaction
    pub fn reveal_fees(&self) -> Vec<Amount> {
        self.reveals
            .iter()
            .map(|reveal| {
                let input: Amount = reveal
                    .input
                    .iter()
                    .map(|input| self.commit.output[input.previous_output.vout as usize].value)
                    .sum();
                let output: Amount = reveal.output.iter().map(|o| o.value).sum();
                input - output
            })
            .collect()
    }

    /// Commit fee plus every reveal fee
    pub fn total_fees(&self) -> Amount {
        self.commit_fee() + self.reveal_fees().into_iter().sum::<Amount>()
    }
}
