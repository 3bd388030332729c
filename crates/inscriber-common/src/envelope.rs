//! Envelope derivation
//!
//! Every data item gets its own `EnvelopeContext`: an ephemeral keypair, a
//! single leaf script spendable by that key, and the taproot commitment
//! output that the commit transaction pays into. The leaf script always
//! starts with `<pubkey> OP_CHECKSIG`; the payload follows inside an
//! unexecuted `OP_FALSE OP_IF ... OP_ENDIF` envelope:
//!
//! ```text
//! <pubkey> OP_CHECKSIG
//! OP_FALSE OP_IF
//!   "ord" OP_PUSHBYTES_1 0x01 <content_type>
//!   OP_0 <body_chunk_1> <body_chunk_2> ...
//! OP_ENDIF
//! ```

use crate::{InscriberError, Result};
use bitcoin::key::{Keypair, PrivateKey, TapTweak};
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF, OP_PUSHBYTES_0};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{Builder, PushBytes, PushBytesBuf};
use bitcoin::secp256k1::constants::SCHNORR_SIGNATURE_SIZE;
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification, XOnlyPublicKey};
use bitcoin::taproot::{
    ControlBlock, LeafVersion, TapLeafHash, TaprootBuilder, TAPROOT_CONTROL_BASE_SIZE,
};
use bitcoin::{Address, Network, ScriptBuf, Witness};
use core::fmt;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Ordinals protocol identifier
pub const PROTOCOL_ID: [u8; 3] = *b"ord";
/// Content type tag inside an inscription envelope
pub const CONTENT_TYPE_TAG: [u8; 1] = [0x01];
/// Maximum size of a single data push in tapscript
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// What a data item embeds in its leaf script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Plain value transfer, the leaf is just `<pubkey> OP_CHECKSIG`
    None,
    /// Ordinals inscription
    Inscription { content_type: String, body: Vec<u8> },
    /// Opaque commitment bytes (e.g. a token etching commitment)
    Commitment(Vec<u8>),
}

impl Payload {
    /// Every push in the envelope must fit the tapscript element limit, even
    /// inside the unexecuted branch. Body and commitment bytes are chunked;
    /// the content type is a single push.
    pub fn check_push_sizes(&self) -> Result<()> {
        match self {
            Payload::Inscription { content_type, .. }
                if content_type.len() > MAX_SCRIPT_ELEMENT_SIZE =>
            {
                Err(InscriberError::InvalidParameters(format!(
                    "content type is {} bytes, the limit is {MAX_SCRIPT_ELEMENT_SIZE}",
                    content_type.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One item to reveal: a payload, where it goes and how much it carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub payload: Payload,
    pub destination: String,
    /// Value of the reveal output; the request default applies when unset
    pub amount: Option<u64>,
}

impl DataItem {
    pub fn inscription(
        destination: impl Into<String>,
        content_type: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            payload: Payload::Inscription {
                content_type: content_type.into(),
                body,
            },
            destination: destination.into(),
            amount: None,
        }
    }

    pub fn transfer(destination: impl Into<String>, amount: u64) -> Self {
        Self {
            payload: Payload::None,
            destination: destination.into(),
            amount: Some(amount),
        }
    }
}

/// Whether every envelope gets a fresh ephemeral key or all share one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevealKeyMode {
    #[default]
    Independent,
    Shared,
}

/// Per-item envelope: ephemeral key, leaf script and commitment output
#[derive(Clone)]
pub struct EnvelopeContext {
    keypair: Keypair,
    leaf_script: ScriptBuf,
    leaf_hash: TapLeafHash,
    commit_script: ScriptBuf,
    commit_address: Address,
    control_block: ControlBlock,
    recovery_key: PrivateKey,
}

impl fmt::Debug for EnvelopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeContext")
            .field("internal_key", &self.internal_key())
            .field("leaf_script_len", &self.leaf_script.len())
            .field("commit_address", &self.commit_address)
            .finish_non_exhaustive()
    }
}

impl EnvelopeContext {
    /// Derive the commitment for `payload` locked to `keypair`.
    pub fn new<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        keypair: Keypair,
        payload: &Payload,
        network: Network,
    ) -> Result<Self> {
        let (internal_key, _parity) = keypair.x_only_public_key();
        let leaf_script = build_leaf_script(&internal_key, payload)?;

        let spend_info = TaprootBuilder::new()
            .add_leaf(0, leaf_script.clone())?
            .finalize(secp, internal_key)
            .map_err(|_| InscriberError::Crypto("Failed to finalize taproot tree".to_string()))?;

        let output_key = spend_info.output_key();
        let commit_script = ScriptBuf::new_p2tr_tweaked(output_key);
        let commit_address = Address::p2tr_tweaked(output_key, network);

        let control_block = spend_info
            .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| InscriberError::Crypto("Failed to get control block".to_string()))?;

        let tweaked = keypair.tap_tweak(secp, spend_info.merkle_root());
        let recovery_key = PrivateKey::new(tweaked.to_keypair().secret_key(), network);

        Ok(Self {
            keypair,
            leaf_hash: TapLeafHash::from_script(&leaf_script, LeafVersion::TapScript),
            leaf_script,
            commit_script,
            commit_address,
            control_block,
            recovery_key,
        })
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    pub fn leaf_script(&self) -> &ScriptBuf {
        &self.leaf_script
    }

    pub fn leaf_hash(&self) -> TapLeafHash {
        self.leaf_hash
    }

    /// Locking script of the commitment output
    pub fn commit_script(&self) -> &ScriptBuf {
        &self.commit_script
    }

    pub fn commit_address(&self) -> &Address {
        &self.commit_address
    }

    pub fn control_block(&self) -> &ControlBlock {
        &self.control_block
    }

    /// Tweaked private key able to key-path spend the commitment output
    pub fn recovery_key(&self) -> &PrivateKey {
        &self.recovery_key
    }

    /// Witness with the exact shape of the final one: a zeroed 64-byte
    /// signature, the leaf script and a zeroed 33-byte control block.
    pub fn placeholder_witness(&self) -> Witness {
        let mut witness = Witness::new();
        witness.push([0u8; SCHNORR_SIGNATURE_SIZE]);
        witness.push(self.leaf_script.as_bytes());
        witness.push([0u8; TAPROOT_CONTROL_BASE_SIZE]);
        witness
    }

    /// Final script-path witness: `[signature, leaf script, control block]`
    pub fn reveal_witness(&self, signature: &[u8]) -> Witness {
        let mut witness = Witness::new();
        witness.push(signature);
        witness.push(self.leaf_script.as_bytes());
        witness.push(self.control_block.serialize());
        witness
    }
}

/// Build the leaf script `<internal_key> OP_CHECKSIG` followed by the payload envelope.
pub fn build_leaf_script(internal_key: &XOnlyPublicKey, payload: &Payload) -> Result<ScriptBuf> {
    let mut builder = Builder::new()
        .push_x_only_key(internal_key)
        .push_opcode(OP_CHECKSIG);

    match payload {
        Payload::None => {}
        Payload::Inscription { content_type, body } => {
            payload.check_push_sizes()?;
            let content_type = PushBytesBuf::try_from(content_type.as_bytes().to_vec())
                .map_err(|_| {
                    InscriberError::InvalidParameters("content type too long".to_string())
                })?;
            builder = builder
                .push_opcode(OP_FALSE)
                .push_opcode(OP_IF)
                .push_slice(PROTOCOL_ID)
                .push_slice(CONTENT_TYPE_TAG)
                .push_slice(content_type)
                .push_opcode(OP_PUSHBYTES_0);
            builder = push_chunks(builder, body)?;
            builder = builder.push_opcode(OP_ENDIF);
        }
        Payload::Commitment(bytes) => {
            builder = builder.push_opcode(OP_FALSE).push_opcode(OP_IF);
            builder = push_chunks(builder, bytes)?;
            builder = builder.push_opcode(OP_ENDIF);
        }
    }

    Ok(builder.into_script())
}

fn push_chunks(mut builder: Builder, data: &[u8]) -> Result<Builder> {
    for chunk in data.chunks(MAX_SCRIPT_ELEMENT_SIZE) {
        let push: &PushBytes = chunk
            .try_into()
            .map_err(|_| InscriberError::InvalidParameters("payload chunk too large".to_string()))?;
        builder = builder.push_slice(push);
    }
    Ok(builder)
}

/// Draw a fresh ephemeral keypair from `rng`.
pub fn generate_keypair<C: Signing, R: RngCore + CryptoRng + ?Sized>(
    secp: &Secp256k1<C>,
    rng: &mut R,
) -> Result<Keypair> {
    loop {
        let mut bytes = [0u8; 32];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| InscriberError::Crypto(format!("create taproot private key err: {e}")))?;
        // Out-of-range scalars are astronomically rare, draw again
        if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
            return Ok(Keypair::from_secret_key(secp, &secret_key));
        }
    }
}

/// Derive one envelope per data item. Any failure discards the whole batch.
pub fn derive_envelopes<C, R>(
    secp: &Secp256k1<C>,
    items: &[DataItem],
    network: Network,
    key_mode: RevealKeyMode,
    rng: &mut R,
) -> Result<Vec<EnvelopeContext>>
where
    C: Signing + Verification,
    R: RngCore + CryptoRng + ?Sized,
{
    if items.is_empty() {
        return Err(InscriberError::InvalidParameters("no data items to reveal".to_string()));
    }

    let shared = match key_mode {
        RevealKeyMode::Shared => Some(generate_keypair(secp, rng)?),
        RevealKeyMode::Independent => None,
    };

    let mut envelopes = Vec::with_capacity(items.len());
    for item in items {
        let keypair = match shared {
            Some(keypair) => keypair,
            None => generate_keypair(secp, rng)?,
        };
        envelopes.push(EnvelopeContext::new(secp, keypair, &item.payload, network)?);
    }

    log::info!(
        "Derived {} envelope(s) ({:?} reveal keys)",
        envelopes.len(),
        key_mode
    );
    Ok(envelopes)
}

/// Map a file name to the MIME type recorded in its inscription.
pub fn content_type_from_path(path: &str) -> Result<&'static str> {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" => Ok("image/jpg"),
        "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "svg" => Ok("image/svg+xml"),
        "webp" => Ok("image/webp"),
        "mp4" => Ok("video/mp4"),
        "mp3" => Ok("audio/mpeg"),
        "txt" => Ok("text/plain;charset=utf-8"),
        "html" => Ok("text/html;charset=utf-8"),
        _ => Err(InscriberError::InvalidParameters(format!(
            "unknown inscription file suffix: {path}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::script::Instruction;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_keypair() -> Keypair {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[1u8; 32]).expect("valid key");
        Keypair::from_secret_key(&secp, &secret_key)
    }

    #[test]
    fn test_bare_leaf_is_pubkey_checksig() {
        let (xonly, _) = test_keypair().x_only_public_key();
        let script = build_leaf_script(&xonly, &Payload::None).unwrap();
        // PUSH32 <key> OP_CHECKSIG
        assert_eq!(script.len(), 34);
        assert_eq!(script.as_bytes()[0], 0x20);
        assert_eq!(&script.as_bytes()[1..33], &xonly.serialize());
        assert_eq!(script.as_bytes()[33], OP_CHECKSIG.to_u8());
    }

    #[test]
    fn test_inscription_envelope_contents() {
        let (xonly, _) = test_keypair().x_only_public_key();
        let payload = Payload::Inscription {
            content_type: "text/plain".to_string(),
            body: b"Hello, World!".to_vec(),
        };
        let script = build_leaf_script(&xonly, &payload).unwrap();
        let script_hex = hex::encode(script.as_bytes());
        assert!(script_hex.contains(&hex::encode(b"ord")));
        assert!(script_hex.contains(&hex::encode(b"text/plain")));
        assert!(script_hex.contains(&hex::encode(b"Hello, World!")));
        assert_eq!(*script.as_bytes().last().unwrap(), OP_ENDIF.to_u8());
    }

    #[test]
    fn test_large_body_is_chunked() {
        let (xonly, _) = test_keypair().x_only_public_key();
        let payload = Payload::Commitment(vec![0xAB; 1300]);
        let script = build_leaf_script(&xonly, &payload).unwrap();
        let pushes = script
            .instructions()
            .filter_map(|ins| match ins.unwrap() {
                Instruction::PushBytes(bytes) if bytes.len() > 32 => Some(bytes.len()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(pushes, vec![520, 520, 260]);
    }

    #[test]
    fn test_oversized_content_type_is_rejected() {
        let (xonly, _) = test_keypair().x_only_public_key();
        let payload = Payload::Inscription {
            content_type: "a".repeat(MAX_SCRIPT_ELEMENT_SIZE + 80),
            body: b"x".to_vec(),
        };
        let err = build_leaf_script(&xonly, &payload).unwrap_err();
        assert!(matches!(err, InscriberError::InvalidParameters(_)));

        let at_limit = Payload::Inscription {
            content_type: "a".repeat(MAX_SCRIPT_ELEMENT_SIZE),
            body: b"x".to_vec(),
        };
        let script = build_leaf_script(&xonly, &at_limit).unwrap();
        let largest = script
            .instructions()
            .filter_map(|ins| match ins.unwrap() {
                Instruction::PushBytes(bytes) => Some(bytes.len()),
                _ => None,
            })
            .max();
        assert_eq!(largest, Some(MAX_SCRIPT_ELEMENT_SIZE));
    }

    #[test]
    fn test_envelope_commitment_and_recovery_key() {
        let secp = Secp256k1::new();
        let keypair = test_keypair();
        let envelope =
            EnvelopeContext::new(&secp, keypair, &Payload::None, Network::Regtest).unwrap();

        assert!(envelope.commit_script().is_p2tr());
        assert_eq!(envelope.commit_address().script_pubkey(), *envelope.commit_script());
        assert_eq!(envelope.control_block().serialize().len(), TAPROOT_CONTROL_BASE_SIZE);
        assert_eq!(envelope.control_block().internal_key, envelope.internal_key());

        // The recovery key controls the tweaked output key directly
        let recovery = Keypair::from_secret_key(&secp, &envelope.recovery_key().inner);
        let (recovery_xonly, _) = recovery.x_only_public_key();
        assert_eq!(
            ScriptBuf::new_p2tr_tweaked(
                bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(recovery_xonly)
            ),
            *envelope.commit_script()
        );

        assert!(envelope.control_block().verify_taproot_commitment(
            &secp,
            recovery_xonly,
            envelope.leaf_script()
        ));
    }

    #[test]
    fn test_placeholder_witness_matches_real_witness_size() {
        let secp = Secp256k1::new();
        let envelope =
            EnvelopeContext::new(&secp, test_keypair(), &Payload::None, Network::Regtest).unwrap();
        let real = envelope.reveal_witness(&[7u8; 64]);
        assert_eq!(envelope.placeholder_witness().size(), real.size());
    }

    #[test]
    fn test_shared_key_mode_reuses_one_key() {
        let secp = Secp256k1::new();
        let items = vec![
            DataItem::transfer("unused", 100),
            DataItem::inscription("unused", "text/plain", b"a".to_vec()),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let shared =
            derive_envelopes(&secp, &items, Network::Regtest, RevealKeyMode::Shared, &mut rng)
                .unwrap();
        assert_eq!(shared[0].internal_key(), shared[1].internal_key());
        // Different leaves still commit to different outputs and recovery keys
        assert_ne!(shared[0].commit_script(), shared[1].commit_script());
        assert_ne!(shared[0].recovery_key().inner, shared[1].recovery_key().inner);

        let independent =
            derive_envelopes(&secp, &items, Network::Regtest, RevealKeyMode::Independent, &mut rng)
                .unwrap();
        assert_ne!(independent[0].internal_key(), independent[1].internal_key());
    }

    #[test]
    fn test_derive_envelopes_rejects_empty_batch() {
        let secp = Secp256k1::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mode = RevealKeyMode::Independent;
        let err = derive_envelopes(&secp, &[], Network::Regtest, mode, &mut rng).unwrap_err();
        assert!(matches!(err, InscriberError::InvalidParameters(_)));
    }

    #[test]
    fn test_content_type_from_path() {
        assert_eq!(content_type_from_path("1.txt").unwrap(), "text/plain;charset=utf-8");
        assert_eq!(content_type_from_path("art/Card.SVG").unwrap(), "image/svg+xml");
        assert!(content_type_from_path("archive.zip").is_err());
        assert!(content_type_from_path("noextension").is_err());
    }
}
