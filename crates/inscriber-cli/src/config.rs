//! Configuration loading
//!
//! Values come from, in increasing priority: built-in defaults, the JSON
//! config file, command-line flags.

use crate::commands::{InscriberCommands, PlanArgs};
use anyhow::{Context, Result};
use inscriber_common::broadcast::OrchestratorConfig;
use inscriber_common::{InscriberNetwork, DEFAULT_REVEAL_OUT_VALUE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_FEE_RATE: u64 = 1;

/// Contents of `config.json`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub network: Option<String>,
    pub esplora_url: Option<String>,
    pub fee_rate: Option<u64>,
    pub commit_fee_rate: Option<u64>,
    pub reveal_out_value: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub required_confirmations: Option<u32>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".inscriber").join("config.json"))
}

/// Read the config file. An explicit path must exist, the default one may not.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(FileConfig::default()),
        },
    };
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Effective settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub network: InscriberNetwork,
    pub esplora_url: String,
    pub fee_rate: u64,
    pub commit_fee_rate: u64,
    pub reveal_out_value: u64,
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    pub fn resolve(cli: &InscriberCommands, plan: &PlanArgs, file: FileConfig) -> Result<Self> {
        let network = match cli.network.as_ref().or(file.network.as_ref()) {
            Some(name) => InscriberNetwork::from_str(name)?,
            None => InscriberNetwork::default(),
        };
        let esplora_url = match cli.esplora_url.clone().or(file.esplora_url) {
            Some(url) => url,
            None => network.default_esplora_url()?.to_string(),
        };

        let fee_rate = plan.fee_rate.or(file.fee_rate).unwrap_or(DEFAULT_FEE_RATE);
        let defaults = OrchestratorConfig::default();
        Ok(Self {
            network,
            esplora_url,
            fee_rate,
            // Commit fee rate follows the reveal fee rate unless set
            commit_fee_rate: plan.commit_fee_rate.or(file.commit_fee_rate).unwrap_or(fee_rate),
            reveal_out_value: plan
                .reveal_out_value
                .or(file.reveal_out_value)
                .unwrap_or(DEFAULT_REVEAL_OUT_VALUE),
            orchestrator: OrchestratorConfig {
                poll_interval_secs: file.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
                required_confirmations: plan
                    .confirmations
                    .or(file.required_confirmations)
                    .unwrap_or(defaults.required_confirmations),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Commands;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> InscriberCommands {
        let mut full = vec!["inscriber"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["send", "--to", "addr", "--amount", "1000", "--key", "k"]);
        InscriberCommands::parse_from(full)
    }

    fn plan(cli: &InscriberCommands) -> PlanArgs {
        match &cli.command {
            Commands::Send(args) => args.plan.clone(),
            Commands::Inscribe(args) => args.plan.clone(),
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let cli = cli(&["--network", "testnet"]);
        let settings = Settings::resolve(&cli, &plan(&cli), FileConfig::default()).unwrap();
        assert_eq!(settings.esplora_url, "https://mempool.space/testnet/api");
        assert_eq!(settings.fee_rate, 1);
        assert_eq!(settings.commit_fee_rate, 1);
        assert_eq!(settings.reveal_out_value, DEFAULT_REVEAL_OUT_VALUE);
        assert_eq!(settings.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "network": "regtest",
                "esplora_url": "http://localhost:3002",
                "fee_rate": 4,
                "required_confirmations": 2
            }}"#
        )
        .unwrap();
        let file_config = load_file_config(Some(file.path())).unwrap();

        let cli = cli(&["--esplora-url", "http://127.0.0.1:3000"]);
        let settings = Settings::resolve(&cli, &plan(&cli), file_config).unwrap();
        assert_eq!(settings.network.to_string(), "regtest");
        assert_eq!(settings.esplora_url, "http://127.0.0.1:3000");
        assert_eq!(settings.fee_rate, 4);
        assert_eq!(settings.commit_fee_rate, 4);
        assert_eq!(settings.orchestrator.required_confirmations, 2);
    }

    #[test]
    fn test_regtest_needs_explicit_esplora_url() {
        let cli = cli(&["--network", "regtest"]);
        assert!(Settings::resolve(&cli, &plan(&cli), FileConfig::default()).is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_file_config(Some(&dir.path().join("missing.json"))).is_err());
    }
}
