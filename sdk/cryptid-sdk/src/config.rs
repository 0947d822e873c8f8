//! Client configuration

use crate::error::{CryptidSdkError, Result};
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::packet::PACKET_DATA_SIZE;
use std::str::FromStr;

/// Default RPC endpoint (local validator)
pub const DEFAULT_RPC_URL: &str = "http://localhost:8899";

/// Who funds the rent of a proposal's transaction account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RentPayer {
    /// The Cryptid account pays
    DidPays,
    /// The signing authority pays
    #[default]
    SignerPays,
}

impl FromStr for RentPayer {
    type Err = CryptidSdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DID_PAYS" => Ok(RentPayer::DidPays),
            "SIGNER_PAYS" => Ok(RentPayer::SignerPays),
            other => Err(CryptidSdkError::UnsupportedOption {
                option: "rent_payer",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl FromStr for Commitment {
    type Err = CryptidSdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(CryptidSdkError::UnsupportedOption {
                option: "commitment",
                value: other.to_string(),
            }),
        }
    }
}

impl Commitment {
    pub fn to_commitment_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptidConfig {
    /// Solana RPC URL
    pub rpc_url: String,

    /// Commitment used for reads and confirmation
    pub commitment: Commitment,

    /// Funding source for proposal accounts
    pub rent_payer: RentPayer,

    /// Ask the on-chain program for verbose logs
    pub debug: bool,

    /// Serialized transaction budget in bytes
    pub transaction_size_limit: usize,
}

impl Default for CryptidConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: Commitment::default(),
            rent_payer: RentPayer::default(),
            debug: false,
            transaction_size_limit: PACKET_DATA_SIZE,
        }
    }
}

/// Raw file shape; every field optional so partial files fall back to defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    rpc_url: Option<String>,
    commitment: Option<String>,
    rent_payer: Option<String>,
    debug: Option<bool>,
    transaction_size_limit: Option<usize>,
}

impl CryptidConfig {
    /// Read `CRYPTID_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CryptidConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("CRYPTID_RPC_URL") {
            config.rpc_url = url;
        }
        if let Some(commitment) = lookup("CRYPTID_COMMITMENT") {
            config.commitment = commitment.parse()?;
        }
        if let Some(rent_payer) = lookup("CRYPTID_RENT_PAYER") {
            config.rent_payer = rent_payer.parse()?;
        }
        if let Some(debug) = lookup("CRYPTID_DEBUG") {
            config.debug = parse_bool("debug", &debug)?;
        }
        if let Some(limit) = lookup("CRYPTID_TX_SIZE_LIMIT") {
            config.transaction_size_limit =
                limit
                    .parse()
                    .map_err(|_| CryptidSdkError::UnsupportedOption {
                        option: "transaction_size_limit",
                        value: limit.clone(),
                    })?;
        }

        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json).map_err(|e| {
            CryptidSdkError::UnsupportedOption {
                option: "config",
                value: e.to_string(),
            }
        })?;

        let defaults = Self::default();
        Ok(Self {
            rpc_url: file.rpc_url.unwrap_or(defaults.rpc_url),
            commitment: file
                .commitment
                .map(|c| c.parse())
                .transpose()?
                .unwrap_or(defaults.commitment),
            rent_payer: file
                .rent_payer
                .map(|r| r.parse())
                .transpose()?
                .unwrap_or(defaults.rent_payer),
            debug: file.debug.unwrap_or(defaults.debug),
            transaction_size_limit: file
                .transaction_size_limit
                .unwrap_or(defaults.transaction_size_limit),
        })
    }
}

fn parse_bool(option: &'static str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(CryptidSdkError::UnsupportedOption {
            option,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CryptidConfig::default();
        assert_eq!(config.rent_payer, RentPayer::SignerPays);
        assert_eq!(config.transaction_size_limit, 1232);
        assert!(!config.debug);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CRYPTID_RPC_URL", "https://api.devnet.solana.com"),
            ("CRYPTID_RENT_PAYER", "DID_PAYS"),
            ("CRYPTID_DEBUG", "true"),
            ("CRYPTID_TX_SIZE_LIMIT", "900"),
        ]
        .into_iter()
        .collect();

        let config =
            CryptidConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.rpc_url, "https://api.devnet.solana.com");
        assert_eq!(config.rent_payer, RentPayer::DidPays);
        assert!(config.debug);
        assert_eq!(config.transaction_size_limit, 900);
        assert_eq!(config.commitment, Commitment::Confirmed);
    }

    #[test]
    fn test_unknown_rent_payer() {
        let result = CryptidConfig::from_lookup(|k| {
            (k == "CRYPTID_RENT_PAYER").then(|| "NOBODY_PAYS".to_string())
        });
        assert_matches!(
            result,
            Err(CryptidSdkError::UnsupportedOption { option: "rent_payer", value })
                if value == "NOBODY_PAYS"
        );
    }

    #[test]
    fn test_from_json_partial() {
        let config = CryptidConfig::from_json(r#"{"commitment": "finalized"}"#).unwrap();
        assert_eq!(config.commitment, Commitment::Finalized);
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);

        assert_matches!(
            CryptidConfig::from_json(r#"{"rent_payer": "EVERYONE"}"#),
            Err(CryptidSdkError::UnsupportedOption { option: "rent_payer", .. })
        );
    }
}
