//! Commit transaction signing
//!
//! Two implementations of `CommitSigner`: `LocalSigner` signs every input
//! with a caller supplied key, `DelegatedSigner` hands the transaction to an
//! `ExternalSigner` (e.g. a wallet RPC) and rejects incomplete results.

use crate::traits::ExternalSigner;
use crate::{InscriberError, Result};
use async_trait::async_trait;
use bitcoin::ecdsa;
use bitcoin::key::{CompressedPublicKey, Keypair, PrivateKey, TapTweak};
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot;
use bitcoin::{ScriptBuf, Transaction, TxOut, Witness};
use std::sync::Arc;

#[async_trait]
pub trait CommitSigner: Send + Sync {
    /// Return `tx` with every input signed. `prevouts[i]` is spent by input `i`.
    async fn sign_commit(&self, tx: &Transaction, prevouts: &[TxOut]) -> Result<Transaction>;
}

/// Signs with one private key per commit input
pub struct LocalSigner {
    keys: Vec<PrivateKey>,
}

impl LocalSigner {
    pub fn new(keys: Vec<PrivateKey>) -> Self {
        Self { keys }
    }

    fn sign_input<C: Signing + Verification>(
        &self,
        secp: &Secp256k1<C>,
        cache: &mut SighashCache<&Transaction>,
        index: usize,
        prevouts: &[TxOut],
    ) -> Result<Witness> {
        let key = &self.keys[index];
        let prevout = &prevouts[index];

        if prevout.script_pubkey.is_p2tr() {
            let keypair = Keypair::from_secret_key(secp, &key.inner);
            let (internal_key, _) = keypair.x_only_public_key();
            if ScriptBuf::new_p2tr(secp, internal_key, None) != prevout.script_pubkey {
                return Err(InscriberError::Signing(format!(
                    "key for commit input {index} does not control its taproot output"
                )));
            }
            let sighash = cache.taproot_key_spend_signature_hash(
                index,
                &Prevouts::All(prevouts),
                TapSighashType::Default,
            )?;
            let tweaked = keypair.tap_tweak(secp, None);
            let signature =
                secp.sign_schnorr_no_aux_rand(&Message::from(sighash), &tweaked.to_keypair());
            Ok(Witness::p2tr_key_spend(&taproot::Signature {
                signature,
                sighash_type: TapSighashType::Default,
            }))
        } else if prevout.script_pubkey.is_p2wpkh() {
            let pubkey = CompressedPublicKey::from_private_key(secp, key)
                .map_err(|e| InscriberError::Signing(format!("commit input {index}: {e}")))?;
            if ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()) != prevout.script_pubkey {
                return Err(InscriberError::Signing(format!(
                    "key for commit input {index} does not control its P2WPKH output"
                )));
            }
            let sighash = cache.p2wpkh_signature_hash(
                index,
                &prevout.script_pubkey,
                prevout.value,
                EcdsaSighashType::All,
            )?;
            let signature = secp.sign_ecdsa(&Message::from(sighash), &key.inner);
            Ok(Witness::p2wpkh(
                &ecdsa::Signature {
                    signature,
                    sighash_type: EcdsaSighashType::All,
                },
                &pubkey.0,
            ))
        } else {
            Err(InscriberError::Signing(format!(
                "commit input {index}: local signing supports P2TR and P2WPKH outputs only"
            )))
        }
    }
}

#[async_trait]
impl CommitSigner for LocalSigner {
    async fn sign_commit(&self, tx: &Transaction, prevouts: &[TxOut]) -> Result<Transaction> {
        if self.keys.len() != tx.input.len() || prevouts.len() != tx.input.len() {
            return Err(InscriberError::InvalidParameters(format!(
                "commit has {} inputs, got {} keys and {} previous outputs",
                tx.input.len(),
                self.keys.len(),
                prevouts.len()
            )));
        }

        let secp = Secp256k1::new();
        let mut cache = SighashCache::new(tx);
        let witnesses = (0..tx.input.len())
            .map(|index| self.sign_input(&secp, &mut cache, index, prevouts))
            .collect::<Result<Vec<_>>>()?;

        let mut signed = tx.clone();
        for (input, witness) in signed.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        log::debug!("Signed {} commit input(s) locally", signed.input.len());
        Ok(signed)
    }
}

/// Delegates commit signing to an external wallet
pub struct DelegatedSigner {
    signer: Arc<dyn ExternalSigner>,
}

impl DelegatedSigner {
    pub fn new(signer: Arc<dyn ExternalSigner>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl CommitSigner for DelegatedSigner {
    async fn sign_commit(&self, tx: &Transaction, prevouts: &[TxOut]) -> Result<Transaction> {
        let signed = self.signer.sign_raw_transaction(tx, prevouts).await?;
        if !signed.complete {
            return Err(InscriberError::Signing(
                "sign commit tx error: external signer reported incomplete signing".to_string(),
            ));
        }
        log::debug!("External signer completed commit transaction");
        Ok(signed.transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SignedTransaction;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, Network, OutPoint, Sequence, TxIn, Txid};

    fn key(byte: u8) -> PrivateKey {
        PrivateKey::new(SecretKey::from_slice(&[byte; 32]).unwrap(), Network::Regtest)
    }

    fn spend(prevout_script: ScriptBuf) -> (Transaction, Vec<TxOut>) {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([2u8; 32]),
                    vout: 1,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(9_000),
                script_pubkey: prevout_script.clone(),
            }],
        };
        let prevouts = vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: prevout_script,
        }];
        (tx, prevouts)
    }

    #[tokio::test]
    async fn test_local_taproot_key_spend_preserves_txid() {
        let secp = Secp256k1::new();
        let key = key(5);
        let (xonly, _) = key.inner.x_only_public_key(&secp);
        let (tx, prevouts) = spend(ScriptBuf::new_p2tr(&secp, xonly, None));

        let signed = LocalSigner::new(vec![key]).sign_commit(&tx, &prevouts).await.unwrap();
        assert_eq!(signed.compute_txid(), tx.compute_txid());
        assert_eq!(signed.input[0].witness.len(), 1);
        assert_eq!(signed.input[0].witness.nth(0).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_local_p2wpkh_spend() {
        let secp = Secp256k1::new();
        let key = key(6);
        let pubkey = CompressedPublicKey::from_private_key(&secp, &key).unwrap();
        let (tx, prevouts) = spend(ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()));

        let signed = LocalSigner::new(vec![key]).sign_commit(&tx, &prevouts).await.unwrap();
        assert_eq!(signed.compute_txid(), tx.compute_txid());
        assert_eq!(signed.input[0].witness.len(), 2);
        assert_eq!(signed.input[0].witness.nth(1).unwrap(), pubkey.to_bytes().as_slice());
    }

    #[tokio::test]
    async fn test_local_signer_rejects_foreign_key() {
        let secp = Secp256k1::new();
        let (xonly, _) = key(7).inner.x_only_public_key(&secp);
        let (tx, prevouts) = spend(ScriptBuf::new_p2tr(&secp, xonly, None));
        let err = LocalSigner::new(vec![key(8)]).sign_commit(&tx, &prevouts).await.unwrap_err();
        assert!(matches!(err, InscriberError::Signing(_)));
    }

    #[tokio::test]
    async fn test_local_signer_rejects_key_count_mismatch() {
        let secp = Secp256k1::new();
        let (xonly, _) = key(7).inner.x_only_public_key(&secp);
        let (tx, prevouts) = spend(ScriptBuf::new_p2tr(&secp, xonly, None));
        let err = LocalSigner::new(vec![]).sign_commit(&tx, &prevouts).await.unwrap_err();
        assert!(matches!(err, InscriberError::InvalidParameters(_)));
    }

    struct IncompleteSigner;

    #[async_trait]
    impl ExternalSigner for IncompleteSigner {
        async fn sign_raw_transaction(
            &self,
            tx: &Transaction,
            _prevouts: &[TxOut],
        ) -> Result<SignedTransaction> {
            Ok(SignedTransaction {
                transaction: tx.clone(),
                complete: false,
            })
        }
    }

    #[tokio::test]
    async fn test_delegated_signer_fails_when_incomplete() {
        let secp = Secp256k1::new();
        let (xonly, _) = key(7).inner.x_only_public_key(&secp);
        let (tx, prevouts) = spend(ScriptBuf::new_p2tr(&secp, xonly, None));
        let signer = DelegatedSigner::new(Arc::new(IncompleteSigner));
        let err = signer.sign_commit(&tx, &prevouts).await.unwrap_err();
        assert!(matches!(err, InscriberError::Signing(_)));
    }
}
