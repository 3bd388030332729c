//! # CLI commands for `inscriber`
//!
//! `inscribe` embeds files as ordinals inscriptions, `send` moves plain
//! amounts through commitment outputs. Both share the planning and
//! broadcast flags in `PlanArgs`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Taproot commit/reveal inscription tool
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct InscriberCommands {
    /// Path to a JSON config file (defaults to ~/.inscriber/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Network: mainnet, testnet, signet or regtest
    #[arg(short, long)]
    pub network: Option<String>,
    /// Esplora API base URL
    #[arg(long)]
    pub esplora_url: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Inscribe files, one destination per file
    Inscribe(InscribeArgs),
    /// Send amounts to destinations through commitment outputs
    Send(SendArgs),
}

impl Commands {
    pub fn plan_args(&self) -> &PlanArgs {
        match self {
            Commands::Inscribe(args) => &args.plan,
            Commands::Send(args) => &args.plan,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InscribeArgs {
    /// Destination address of each inscription
    #[arg(long = "to", required = true, num_args = 1..)]
    pub to: Vec<String>,
    /// Files to inscribe, content type detected from the extension
    #[arg(long = "file", required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Destination addresses
    #[arg(long = "to", required = true, num_args = 1..)]
    pub to: Vec<String>,
    /// Amount in sats for each destination
    #[arg(long = "amount", required = true, num_args = 1..)]
    pub amounts: Vec<u64>,
    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PlanArgs {
    /// Funding private key (64 hex characters or WIF)
    #[arg(long)]
    pub key: String,
    /// Reveal fee rate in sat/vB
    #[arg(long)]
    pub fee_rate: Option<u64>,
    /// Commit fee rate in sat/vB
    #[arg(long)]
    pub commit_fee_rate: Option<u64>,
    /// Value of each reveal output in sats
    #[arg(long)]
    pub reveal_out_value: Option<u64>,
    /// Reveal every item in one transaction
    #[arg(long)]
    pub single_tx: bool,
    /// Signal replace-by-fee
    #[arg(long)]
    pub rbf: bool,
    /// Use one ephemeral key for every commitment
    #[arg(long)]
    pub shared_key: bool,
    /// Change address, defaults to the funding address
    #[arg(long)]
    pub change_address: Option<String>,
    /// Wait for commit confirmations before revealing
    #[arg(long)]
    pub staged: bool,
    /// Reveal once the commit has more than this many confirmations
    #[arg(long, requires = "staged")]
    pub confirmations: Option<u32>,
    /// Print the signed transactions without broadcasting
    #[arg(long)]
    pub dry_run: bool,
    /// Print each commitment recovery key as a `rawtr(<wif>)#checksum` descriptor
    #[arg(long)]
    pub show_recovery_keys: bool,
}
