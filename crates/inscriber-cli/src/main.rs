//! inscriber CLI - a thin wrapper around inscriber-common
//!
//! Parses the command line, resolves configuration, then plans, signs and
//! broadcasts the commit and reveal transactions through the library.

use anyhow::Result;
use clap::Parser;
use inscriber_common::address::parse_private_key;
use inscriber_common::envelope::content_type_from_path;
use inscriber_common::*;
use serde::Serialize;
use std::sync::Arc;

mod commands;
mod config;
use commands::{Commands, InscriberCommands, PlanArgs};
use config::{load_file_config, Settings};

#[derive(Serialize)]
struct PlanSummary {
    commit_txid: String,
    commit_addresses: Vec<String>,
    reveal_txids: Vec<String>,
    commit_fee: u64,
    reveal_fees: Vec<u64>,
    total_fees: u64,
}

impl From<&FinalizedInscription> for PlanSummary {
    fn from(plan: &FinalizedInscription) -> Self {
        Self {
            commit_txid: plan.commit_txid().to_string(),
            commit_addresses: plan.commit_addresses(),
            reveal_txids: plan.reveal_txids().iter().map(ToString::to_string).collect(),
            commit_fee: plan.commit_fee().to_sat(),
            reveal_fees: plan.reveal_fees().iter().map(|fee| fee.to_sat()).collect(),
            total_fees: plan.total_fees().to_sat(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = InscriberCommands::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let file_config = load_file_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, args.command.plan_args(), file_config)?;
    log::info!("Using {} via {}", settings.network, settings.esplora_url);

    let items = match &args.command {
        Commands::Inscribe(inscribe) => inscription_items(&inscribe.to, &inscribe.files)?,
        Commands::Send(send) => transfer_items(&send.to, &send.amounts)?,
    };
    execute_plan(&settings, args.command.plan_args(), items).await
}

fn inscription_items(to: &[String], files: &[std::path::PathBuf]) -> Result<Vec<DataItem>> {
    if to.len() != files.len() {
        anyhow::bail!("{} destinations for {} files", to.len(), files.len());
    }
    to.iter()
        .zip(files)
        .map(|(destination, path)| {
            let content_type = content_type_from_path(&path.to_string_lossy())?;
            let body = std::fs::read(path)?;
            Ok(DataItem::inscription(destination.clone(), content_type, body))
        })
        .collect()
}

fn transfer_items(to: &[String], amounts: &[u64]) -> Result<Vec<DataItem>> {
    if to.len() != amounts.len() {
        anyhow::bail!("{} destinations for {} amounts", to.len(), amounts.len());
    }
    Ok(to
        .iter()
        .zip(amounts)
        .map(|(destination, amount)| DataItem::transfer(destination.clone(), *amount))
        .collect())
}

async fn execute_plan(settings: &Settings, args: &PlanArgs, items: Vec<DataItem>) -> Result<()> {
    let network = settings.network.0;
    let key = parse_private_key(&args.key, network)?;
    let client = Arc::new(EsploraClient::new(&settings.esplora_url)?);

    let funding = collect_funding(client.as_ref(), &key, network).await?;
    let request = InscriptionRequest {
        network: settings.network,
        items,
        funding: funding.iter().map(|input| input.outpoint).collect(),
        fee_rate: settings.fee_rate,
        commit_fee_rate: settings.commit_fee_rate,
        reveal_out_value: settings.reveal_out_value,
        reveal_mode: if args.single_tx {
            RevealMode::Batched
        } else {
            RevealMode::Isolated
        },
        key_mode: if args.shared_key {
            RevealKeyMode::Shared
        } else {
            RevealKeyMode::Independent
        },
        rbf: args.rbf,
        change_address: args.change_address.clone(),
    };

    let linked = request.plan(&funding, &mut rand::thread_rng())?;
    let signer = LocalSigner::new(vec![key; funding.len()]);
    let plan = linked.sign_commit(&signer).await?;

    println!("{}", serde_json::to_string_pretty(&PlanSummary::from(&plan))?);
    if args.show_recovery_keys {
        let descriptors = plan.recovery_descriptors()?;
        for (address, descriptor) in plan.commit_addresses().iter().zip(descriptors) {
            println!("recovery descriptor for {address}: {descriptor}");
        }
    }

    if args.dry_run {
        println!("commit: {}", plan.commit_hex());
        for (index, reveal) in plan.reveal_hexes().iter().enumerate() {
            println!("reveal #{index}: {reveal}");
        }
        return Ok(());
    }

    let protocol = if args.staged {
        BroadcastProtocol::Staged
    } else {
        BroadcastProtocol::Immediate
    };
    let orchestrator = BroadcastOrchestrator::new(client, settings.orchestrator.clone());
    let report = orchestrator.broadcast(&plan, protocol).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
