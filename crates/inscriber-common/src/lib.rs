//! Inscriber Common Library
//!
//! Plans, signs and broadcasts a taproot commit transaction together with
//! the reveal transaction(s) spending its commitment outputs along a single
//! leaf script path.
//!
//! Pipeline, each stage feeding the next:
//! - `envelope`: ephemeral key, leaf script and commitment output per item
//! - `reveal`: reveal skeletons and exact per-item commitment funding
//! - `commit`: commit transaction with size-based fee and change
//! - `finalize`: linking to the commit txid, script-path signing, weight limit
//! - `signer`: local or delegated commit signing
//! - `broadcast`: immediate or confirmation-gated submission
//!
//! Network access goes through the traits in `traits`; `esplora` implements
//! them over the Esplora REST API.

pub mod address;
pub mod broadcast;
pub mod commit;
pub mod envelope;
pub mod error;
pub mod esplora;
pub mod finalize;
pub mod inscriber;
pub mod network;
pub mod reveal;
pub mod signer;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock_provider;

pub use error::{InscriberError, Result, TxRole};
pub use traits::*;

pub use broadcast::{BroadcastOrchestrator, BroadcastProtocol, BroadcastReport, OrchestratorConfig};
pub use commit::{build_commit, CommitParams, CommitPlan, FundingInput};
pub use envelope::{derive_envelopes, DataItem, EnvelopeContext, Payload, RevealKeyMode};
pub use esplora::EsploraClient;
pub use finalize::{link_and_sign_reveals, FinalizedInscription, LinkedPlan};
pub use inscriber::{collect_funding, resolve_funding, InscriptionRequest, MAX_FEE_RATE};
pub use network::InscriberNetwork;
pub use reveal::{plan_reveals, RevealMode, RevealParams, RevealSkeleton, DEFAULT_REVEAL_OUT_VALUE};
pub use signer::{CommitSigner, DelegatedSigner, LocalSigner};

// Re-export the bitcoin crate so downstream crates build against the same version
pub use bitcoin;
