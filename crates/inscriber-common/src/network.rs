//! Network selection for inscriber.

use crate::{InscriberError, Result};
use bitcoin::Network;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InscriberNetwork(pub Network);

impl InscriberNetwork {
    pub fn supported_networks() -> Vec<&'static str> {
        vec!["mainnet", "testnet", "signet", "regtest"]
    }

    /// Default mempool.space Esplora endpoint for this network
    pub fn default_esplora_url(&self) -> Result<&'static str> {
        match self.0 {
            Network::Bitcoin => Ok("https://mempool.space/api"),
            Network::Testnet => Ok("https://mempool.space/testnet/api"),
            Network::Signet => Ok("https://mempool.space/signet/api"),
            _ => Err(InscriberError::Configuration(format!(
                "no default Esplora URL for {self}, pass --esplora-url"
            ))),
        }
    }
}

impl Default for InscriberNetwork {
    fn default() -> Self {
        InscriberNetwork(Network::Regtest)
    }
}

impl From<InscriberNetwork> for Network {
    fn from(network: InscriberNetwork) -> Self {
        network.0
    }
}

impl TryFrom<String> for InscriberNetwork {
    type Error = InscriberError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<InscriberNetwork> for String {
    fn from(network: InscriberNetwork) -> Self {
        network.to_string()
    }
}

impl FromStr for InscriberNetwork {
    type Err = InscriberError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mainnet" | "bitcoin" => Ok(InscriberNetwork(Network::Bitcoin)),
            "testnet" => Ok(InscriberNetwork(Network::Testnet)),
            "signet" => Ok(InscriberNetwork(Network::Signet)),
            "regtest" => Ok(InscriberNetwork(Network::Regtest)),
            _ => Err(InscriberError::InvalidParameters(format!(
                "Invalid network: {s} (expected one of {})",
                Self::supported_networks().join(", ")
            ))),
        }
    }
}

impl core::fmt::Display for InscriberNetwork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}",
            match self.0 {
                Network::Bitcoin => "mainnet",
                Network::Testnet => "testnet",
                Network::Signet => "signet",
                Network::Regtest => "regtest",
                _ => "unknown",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_round_trips_through_display() {
        for name in InscriberNetwork::supported_networks() {
            let network = InscriberNetwork::from_str(name).unwrap();
            assert_eq!(network.to_string(), name);
        }
    }

    #[test]
    fn test_regtest_has_no_default_esplora_url() {
        assert!(InscriberNetwork(Network::Regtest).default_esplora_url().is_err());
        assert_eq!(
            InscriberNetwork(Network::Testnet).default_esplora_url().unwrap(),
            "https://mempool.space/testnet/api"
        );
    }

    #[test]
    fn test_network_serializes_as_name() {
        let json = serde_json::to_string(&InscriberNetwork(Network::Signet)).unwrap();
        assert_eq!(json, "\"signet\"");
        let parsed: InscriberNetwork = serde_json::from_str("\"mainnet\"").unwrap();
        assert_eq!(parsed.0, Network::Bitcoin);
    }

    #[test]
    fn test_unknown_network_is_rejected() {
        assert!(matches!(
            InscriberNetwork::from_str("litecoin"),
            Err(InscriberError::InvalidParameters(_))
        ));
    }
}
