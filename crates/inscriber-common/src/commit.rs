//! Commit transaction construction
//!
//! The commit transaction spends the funding inputs into one commitment
//! output per envelope plus an optional change output. Its fee is computed
//! from the size the transaction will have once signed, using fixed-size
//! dummy witnesses for each funding script type.

use crate::envelope::EnvelopeContext;
use crate::reveal::{checked_total, fee_at_rate, sequence_for, RevealSkeleton};
use crate::{InscriberError, Result};
use bitcoin::absolute::LockTime;
use bitcoin::script::Builder;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};

/// DER signature upper bound including the sighash byte
const ECDSA_SIGNATURE_MAX_SIZE: usize = 72;
const COMPRESSED_PUBKEY_SIZE: usize = 33;
const SCHNORR_KEY_SPEND_SIZE: usize = 64;
/// `OP_0 <20-byte key hash>` redeem script of a nested P2WPKH input
const NESTED_P2WPKH_REDEEM_SIZE: usize = 22;

/// A funding outpoint resolved to the output it spends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInput {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitParams {
    /// sat/vB
    pub fee_rate: u64,
    pub rbf: bool,
    /// Change locking script, defaults to the first funding input's script
    pub change_script: Option<ScriptBuf>,
}

/// Unsigned commit transaction with its funding breakdown
#[derive(Debug, Clone)]
pub struct CommitPlan {
    transaction: Transaction,
    prevouts: Vec<TxOut>,
    commitment_count: usize,
    total_input: Amount,
    fee: Amount,
    change: Option<Amount>,
}

impl CommitPlan {
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Outputs spent by the commit inputs, in input order
    pub fn prevouts(&self) -> &[TxOut] {
        &self.prevouts
    }

    /// Commitment outputs occupy vouts `0..commitment_count`
    pub fn commitment_count(&self) -> usize {
        self.commitment_count
    }

    pub fn total_input(&self) -> Amount {
        self.total_input
    }

    /// Fee actually paid: inputs minus every output
    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn change(&self) -> Option<Amount> {
        self.change
    }

    pub(crate) fn into_parts(self) -> (Transaction, Vec<TxOut>) {
        (self.transaction, self.prevouts)
    }
}

fn dummy_spend(script_pubkey: &Script) -> Result<(ScriptBuf, Witness)> {
    if script_pubkey.is_p2tr() {
        Ok((
            ScriptBuf::new(),
            Witness::from_slice(&[vec![0u8; SCHNORR_KEY_SPEND_SIZE]]),
        ))
    } else if script_pubkey.is_p2wpkh() {
        Ok((
            ScriptBuf::new(),
            Witness::from_slice(&[
                vec![0u8; ECDSA_SIGNATURE_MAX_SIZE],
                vec![0u8; COMPRESSED_PUBKEY_SIZE],
            ]),
        ))
    } else if script_pubkey.is_p2sh() {
        let script_sig = Builder::new()
            .push_slice([0u8; NESTED_P2WPKH_REDEEM_SIZE])
            .into_script();
        Ok((
            script_sig,
            Witness::from_slice(&[
                vec![0u8; ECDSA_SIGNATURE_MAX_SIZE],
                vec![0u8; COMPRESSED_PUBKEY_SIZE],
            ]),
        ))
    } else if script_pubkey.is_p2pkh() {
        let script_sig = Builder::new()
            .push_slice([0u8; ECDSA_SIGNATURE_MAX_SIZE])
            .push_slice([0u8; COMPRESSED_PUBKEY_SIZE])
            .into_script();
        Ok((script_sig, Witness::new()))
    } else {
        Err(InscriberError::InvalidParameters(format!(
            "unsupported funding script: {script_pubkey}"
        )))
    }
}

/// Virtual size `tx` will have once every input is signed.
///
/// Exact for P2TR key-path inputs, an upper bound for ECDSA inputs.
pub fn estimate_signed_vsize(tx: &Transaction, prevouts: &[TxOut]) -> Result<usize> {
    if prevouts.len() != tx.input.len() {
        return Err(InscriberError::InvalidParameters(format!(
            "{} inputs but {} previous outputs",
            tx.input.len(),
            prevouts.len()
        )));
    }
    let mut sized = tx.clone();
    for (input, prevout) in sized.input.iter_mut().zip(prevouts) {
        let (script_sig, witness) = dummy_spend(&prevout.script_pubkey)?;
        input.script_sig = script_sig;
        input.witness = witness;
    }
    Ok(sized.vsize())
}

fn fee_for(tx: &Transaction, prevouts: &[TxOut], fee_rate: u64) -> Result<Amount> {
    fee_at_rate(estimate_signed_vsize(tx, prevouts)?, fee_rate)
}

/// Build the unsigned commit transaction funding every commitment output.
pub fn build_commit(
    funding: &[FundingInput],
    envelopes: &[EnvelopeContext],
    skeleton: &RevealSkeleton,
    params: &CommitParams,
) -> Result<CommitPlan> {
    if funding.is_empty() {
        return Err(InscriberError::InvalidParameters("no funding inputs".to_string()));
    }
    if envelopes.len() != skeleton.item_count() {
        return Err(InscriberError::InvalidParameters(format!(
            "{} envelopes but {} planned reveal outputs",
            envelopes.len(),
            skeleton.item_count()
        )));
    }

    let sequence = sequence_for(params.rbf);
    let input = funding
        .iter()
        .map(|f| TxIn {
            previous_output: f.outpoint,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        })
        .collect::<Vec<_>>();
    let prevouts = funding.iter().map(|f| f.txout.clone()).collect::<Vec<_>>();
    let total_input = checked_total(prevouts.iter().map(|p| p.value))?;

    let mut output = envelopes
        .iter()
        .zip(skeleton.outputs())
        .map(|(envelope, plan)| {
            Ok(TxOut {
                value: plan.required_funding()?,
                script_pubkey: envelope.commit_script().clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let reveal_funding = skeleton.total_funding()?;

    let change_script = params
        .change_script
        .clone()
        .unwrap_or_else(|| funding[0].txout.script_pubkey.clone());
    output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: change_script,
    });

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let fee = fee_for(&tx, &prevouts, params.fee_rate)?;
    let change = total_input
        .checked_sub(checked_total([reveal_funding, fee])?)
        .filter(|change| *change > Amount::ZERO);

    match change {
        Some(change) => {
            if let Some(last) = tx.output.last_mut() {
                last.value = change;
            }
        }
        None => {
            tx.output.pop();
            let fee_without_change = fee_for(&tx, &prevouts, params.fee_rate)?;
            let required = checked_total([reveal_funding, fee_without_change])?;
            if total_input < required {
                log::warn!("Commit underfunded: required {required}, available {total_input}");
                return Err(InscriberError::InsufficientBalance {
                    required,
                    available: total_input,
                });
            }
        }
    }

    let total_output = checked_total(tx.output.iter().map(|o| o.value))?;
    let fee = total_input.checked_sub(total_output).ok_or_else(|| {
        InscriberError::InvalidParameters("commit outputs exceed its inputs".to_string())
    })?;
    log::info!(
        "Built commit transaction: {} input(s), {} commitment output(s), fee {}, change {}",
        tx.input.len(),
        envelopes.len(),
        fee,
        change.unwrap_or(Amount::ZERO)
    );

    Ok(CommitPlan {
        transaction: tx,
        prevouts,
        commitment_count: envelopes.len(),
        total_input,
        fee,
        change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{derive_envelopes, DataItem, RevealKeyMode};
    use crate::reveal::{plan_reveals, RevealMode, RevealParams};
    use bitcoin::hashes::Hash;
    use bitcoin::key::{CompressedPublicKey, PrivateKey};
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Address, Network, Txid};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const DEST: &str = "bcrt1q6rhpng9evdsfnn833a4f4vej0asu6dk5srld6x";

    fn planned(n: usize) -> (Vec<EnvelopeContext>, RevealSkeleton) {
        let secp = Secp256k1::new();
        let items = vec![DataItem::transfer(DEST, 1_000); n];
        let mut rng = StdRng::seed_from_u64(3);
        let mode = RevealKeyMode::Independent;
        let envelopes = derive_envelopes(&secp, &items, Network::Regtest, mode, &mut rng).unwrap();
        let skeleton = plan_reveals(
            &envelopes,
            &vec![DEST.to_string(); n],
            &vec![Amount::from_sat(1_000); n],
            Network::Regtest,
            &RevealParams {
                fee_rate: 1,
                mode: RevealMode::Batched,
                rbf: false,
            },
        )
        .unwrap();
        (envelopes, skeleton)
    }

    fn p2tr_funding(value: u64) -> FundingInput {
        let secp = Secp256k1::new();
        let key = PrivateKey::new(SecretKey::from_slice(&[9u8; 32]).unwrap(), Network::Regtest);
        let (xonly, _) = key.inner.x_only_public_key(&secp);
        FundingInput {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([1u8; 32]),
                vout: 0,
            },
            txout: TxOut {
                value: Amount::from_sat(value),
                script_pubkey: Address::p2tr(&secp, xonly, None, Network::Regtest).script_pubkey(),
            },
        }
    }

    fn params() -> CommitParams {
        CommitParams {
            fee_rate: 2,
            rbf: false,
            change_script: None,
        }
    }

    #[test]
    fn test_commit_with_change_balances_exactly() {
        let (envelopes, skeleton) = planned(3);
        let funding = vec![p2tr_funding(100_000)];
        let plan = build_commit(&funding, &envelopes, &skeleton, &params()).unwrap();

        let tx = plan.transaction();
        assert_eq!(tx.output.len(), 4);
        for (i, envelope) in envelopes.iter().enumerate() {
            assert_eq!(tx.output[i].script_pubkey, *envelope.commit_script());
            assert_eq!(tx.output[i].value, skeleton.outputs()[i].required_funding().unwrap());
        }
        // Change returns to the funding script
        assert_eq!(tx.output[3].script_pubkey, funding[0].txout.script_pubkey);

        let outputs: Amount = tx.output.iter().map(|o| o.value).sum();
        assert_eq!(outputs + plan.fee(), plan.total_input());
        let vsize = estimate_signed_vsize(tx, plan.prevouts()).unwrap() as u64;
        assert_eq!(plan.fee().to_sat(), vsize * 2);
    }

    #[test]
    fn test_explicit_change_script() {
        let (envelopes, skeleton) = planned(1);
        let change_script = crate::address::decode_address(DEST, Network::Regtest).unwrap();
        let mut params = params();
        params.change_script = Some(change_script.clone());
        let plan = build_commit(&[p2tr_funding(50_000)], &envelopes, &skeleton, &params).unwrap();
        assert_eq!(plan.transaction().output.last().unwrap().script_pubkey, change_script);
    }

    #[test]
    fn test_change_dropped_when_exhausted() {
        let (envelopes, skeleton) = planned(1);
        let funding = skeleton.total_funding().unwrap().to_sat();
        // Enough for the no-change transaction, not for one with change
        let no_change_fee = {
            let roomy = [p2tr_funding(funding + 10_000)];
            let plan = build_commit(&roomy, &envelopes, &skeleton, &params()).unwrap();
            let mut tx = plan.transaction().clone();
            tx.output.pop();
            estimate_signed_vsize(&tx, plan.prevouts()).unwrap() as u64 * 2
        };
        let plan = build_commit(
            &[p2tr_funding(funding + no_change_fee)],
            &envelopes,
            &skeleton,
            &params(),
        )
        .unwrap();
        assert_eq!(plan.transaction().output.len(), 1);
        assert_eq!(plan.change(), None);
        assert_eq!(plan.fee().to_sat(), no_change_fee);
    }

    #[test]
    fn test_insufficient_balance() {
        let (envelopes, skeleton) = planned(2);
        let err =
            build_commit(&[p2tr_funding(1_500)], &envelopes, &skeleton, &params()).unwrap_err();
        match err {
            InscriberError::InsufficientBalance { required, available } => {
                assert_eq!(available, Amount::from_sat(1_500));
                assert!(required > available);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overflowing_commit_fee_rate_is_rejected() {
        let (envelopes, skeleton) = planned(1);
        let mut params = params();
        params.fee_rate = u64::MAX / 100;
        let err = build_commit(&[p2tr_funding(100_000)], &envelopes, &skeleton, &params)
            .unwrap_err();
        assert!(matches!(err, InscriberError::InvalidParameters(_)));
    }

    #[test]
    fn test_dummy_witness_sizes() {
        let secp = Secp256k1::new();
        let key = PrivateKey::new(SecretKey::from_slice(&[9u8; 32]).unwrap(), Network::Regtest);
        let compressed = CompressedPublicKey::from_private_key(&secp, &key).unwrap();

        let p2wpkh = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
        let (sig, witness) = dummy_spend(&p2wpkh).unwrap();
        assert!(sig.is_empty());
        assert_eq!(witness.len(), 2);

        let p2pkh = ScriptBuf::new_p2pkh(&key.public_key(&secp).pubkey_hash());
        let (sig, witness) = dummy_spend(&p2pkh).unwrap();
        assert_eq!(sig.len(), 107);
        assert!(witness.is_empty());

        let p2sh = Address::p2shwpkh(&compressed, Network::Regtest).script_pubkey();
        let (sig, _) = dummy_spend(&p2sh).unwrap();
        assert_eq!(sig.len(), 23);

        assert!(dummy_spend(&ScriptBuf::new_op_return([1u8; 4])).is_err());
    }
}
