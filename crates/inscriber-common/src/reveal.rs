//! Reveal transaction planning
//!
//! Builds the reveal transactions before the commit transaction exists. Each
//! input points at a placeholder txid with the real commitment output index;
//! the linker substitutes the commit txid later. Because the final witness
//! of every input is `[64-byte signature, leaf script, 33-byte control
//! block]`, its size is known up front and the funding each commitment
//! output needs is computed exactly here.

use crate::address::decode_address;
use crate::envelope::EnvelopeContext;
use crate::{InscriberError, Result};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};

/// Default value carried by a reveal output when an item sets no amount
pub const DEFAULT_REVEAL_OUT_VALUE: u64 = 546;

/// Sequence signalling replace-by-fee (final - 10)
pub const RBF_SEQUENCE: Sequence = Sequence(0xffff_fff5);

/// Sequence used when replace-by-fee is not requested (final - 1)
pub const NON_RBF_SEQUENCE: Sequence = Sequence::ENABLE_LOCKTIME_NO_RBF;

/// Segwit marker and flag bytes
const SEGWIT_MARKER_FLAG_SIZE: usize = 2;

/// `size * fee_rate`, failing instead of wrapping on absurd fee rates.
pub(crate) fn fee_at_rate(size: usize, fee_rate: u64) -> Result<Amount> {
    (size as u64)
        .checked_mul(fee_rate)
        .map(Amount::from_sat)
        .ok_or_else(|| {
            InscriberError::InvalidParameters(format!(
                "fee for {size} vbytes at {fee_rate} sat/vB overflows"
            ))
        })
}

/// Sum of `amounts`, failing on overflow.
pub(crate) fn checked_total(amounts: impl IntoIterator<Item = Amount>) -> Result<Amount> {
    amounts.into_iter().try_fold(Amount::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| InscriberError::InvalidParameters("amount overflow".to_string()))
    })
}

pub fn sequence_for(rbf: bool) -> Sequence {
    if rbf {
        RBF_SEQUENCE
    } else {
        NON_RBF_SEQUENCE
    }
}

/// One transaction spending every commitment output, or one per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevealMode {
    #[default]
    Isolated,
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealParams {
    /// sat/vB
    pub fee_rate: u64,
    pub mode: RevealMode,
    pub rbf: bool,
}

/// Funding breakdown of one commitment output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealOutputPlan {
    pub carried: Amount,
    /// Share of the reveal transaction's non-witness fee
    pub base_fee: Amount,
    pub witness_fee: Amount,
}

impl RevealOutputPlan {
    /// Value the commit transaction must send to this item's commitment output
    pub fn required_funding(&self) -> Result<Amount> {
        checked_total([self.carried, self.base_fee, self.witness_fee])
    }
}

/// Reveal transactions whose inputs still reference the placeholder txid
#[derive(Debug, Clone)]
pub struct RevealSkeleton {
    mode: RevealMode,
    transactions: Vec<Transaction>,
    outputs: Vec<RevealOutputPlan>,
}

impl RevealSkeleton {
    pub fn mode(&self) -> RevealMode {
        self.mode
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn outputs(&self) -> &[RevealOutputPlan] {
        &self.outputs
    }

    pub fn item_count(&self) -> usize {
        self.outputs.len()
    }

    /// Sum of every commitment output value
    pub fn total_funding(&self) -> Result<Amount> {
        self.outputs.iter().try_fold(Amount::ZERO, |total, output| {
            checked_total([total, output.required_funding()?])
        })
    }

    /// Transaction index and input index spending item `item`'s commitment
    pub fn position(&self, item: usize) -> (usize, usize) {
        match self.mode {
            RevealMode::Batched => (0, item),
            RevealMode::Isolated => (item, 0),
        }
    }

    pub(crate) fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }
}

/// Fee of one script-path witness: `((size + 2 + 3) / 4) * fee_rate`.
pub fn witness_fee(envelope: &EnvelopeContext, fee_rate: u64) -> Result<Amount> {
    let size = envelope.placeholder_witness().size() + SEGWIT_MARKER_FLAG_SIZE + 3;
    fee_at_rate(size / 4, fee_rate)
}

fn placeholder_input(index: usize, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output: OutPoint {
            txid: Txid::all_zeros(),
            vout: index as u32,
        },
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

fn empty_transaction() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![],
        output: vec![],
    }
}

/// Build the reveal skeleton for `envelopes`.
///
/// `destinations[i]` receives `carried[i]` from item `i`. Any destination
/// that fails to decode for `network` aborts the whole plan.
pub fn plan_reveals(
    envelopes: &[EnvelopeContext],
    destinations: &[String],
    carried: &[Amount],
    network: Network,
    params: &RevealParams,
) -> Result<RevealSkeleton> {
    let total = envelopes.len();
    if total == 0 {
        return Err(InscriberError::InvalidParameters("no envelopes to reveal".to_string()));
    }
    if destinations.len() != total || carried.len() != total {
        return Err(InscriberError::InvalidParameters(format!(
            "mismatched lengths: {} envelopes, {} destinations, {} amounts",
            total,
            destinations.len(),
            carried.len()
        )));
    }

    let scripts = destinations
        .iter()
        .map(|destination| decode_address(destination, network))
        .collect::<Result<Vec<_>>>()?;

    let sequence = sequence_for(params.rbf);
    let fee_rate = params.fee_rate;

    let (transactions, outputs) = match params.mode {
        RevealMode::Batched => {
            let mut tx = empty_transaction();
            for (i, script) in scripts.into_iter().enumerate() {
                tx.input.push(placeholder_input(i, sequence));
                tx.output.push(TxOut {
                    value: carried[i],
                    script_pubkey: script,
                });
            }
            // Non-witness fee is shared evenly, the remainder of the division is dropped
            let base_fee = fee_at_rate(tx.base_size(), fee_rate)?;
            let each_base_fee = Amount::from_sat(base_fee.to_sat() / total as u64);
            let outputs = envelopes
                .iter()
                .zip(carried)
                .map(|(envelope, carried)| {
                    Ok(RevealOutputPlan {
                        carried: *carried,
                        base_fee: each_base_fee,
                        witness_fee: witness_fee(envelope, fee_rate)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (vec![tx], outputs)
        }
        RevealMode::Isolated => {
            let mut transactions = Vec::with_capacity(total);
            let mut outputs = Vec::with_capacity(total);
            for (i, script) in scripts.into_iter().enumerate() {
                let mut tx = empty_transaction();
                tx.input.push(placeholder_input(i, sequence));
                tx.output.push(TxOut {
                    value: carried[i],
                    script_pubkey: script,
                });
                outputs.push(RevealOutputPlan {
                    carried: carried[i],
                    base_fee: fee_at_rate(tx.base_size(), fee_rate)?,
                    witness_fee: witness_fee(&envelopes[i], fee_rate)?,
                });
                transactions.push(tx);
            }
            (transactions, outputs)
        }
    };

    let skeleton = RevealSkeleton {
        mode: params.mode,
        transactions,
        outputs,
    };
    log::info!(
        "Planned {} reveal transaction(s) for {} item(s), total commitment funding {}",
        skeleton.transactions.len(),
        total,
        skeleton.total_funding()?
    );
    Ok(skeleton)
}
