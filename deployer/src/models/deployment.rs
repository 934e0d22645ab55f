//! Deployment models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::deploy::extract::ExtractionSource;
use crate::errors::DeployError;

/// Target Solana cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Network {
    #[default]
    #[serde(rename = "devnet")]
    Devnet,

    #[serde(rename = "testnet")]
    Testnet,

    #[serde(rename = "mainnet-beta")]
    MainnetBeta,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::MainnetBeta => "mainnet-beta",
        }
    }

    /// Whether the cluster hands out free SOL
    pub fn supports_airdrop(&self) -> bool {
        matches!(self, Network::Devnet | Network::Testnet)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" => Ok(Network::Devnet),
            "testnet" => Ok(Network::Testnet),
            "mainnet-beta" | "mainnet" => Ok(Network::MainnetBeta),
            other => Err(DeployError::invalid_input(format!(
                "Unsupported network: {}",
                other
            ))),
        }
    }
}

/// Wallet section of a deploy request, as sent by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletRequest {
    /// Raw 64-byte secret key as a JSON array of integers
    #[serde(default)]
    pub secret_key: Option<Vec<i64>>,

    /// Path to a Solana CLI keypair file on this host
    #[serde(default)]
    pub keypair_path: Option<String>,

    /// Public address only (not enough to sign)
    #[serde(default)]
    pub address: Option<String>,
}

/// Validated source of the deployment's signing keypair
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WalletOption {
    /// Generate a fresh keypair
    #[default]
    Generate,

    /// Reconstruct from 64 raw secret bytes
    SecretKey(Vec<u8>),

    /// Load from an existing keypair file
    KeypairFile(PathBuf),
}

impl WalletOption {
    /// Validate the caller's wallet section. Exactly one source may be given.
    pub fn from_request(request: Option<&WalletRequest>) -> Result<Self, DeployError> {
        let Some(request) = request else {
            return Ok(WalletOption::Generate);
        };

        match (&request.secret_key, &request.keypair_path, &request.address) {
            (None, None, None) => Ok(WalletOption::Generate),
            (Some(bytes), None, None) => {
                if bytes.len() != 64 {
                    return Err(DeployError::invalid_input(format!(
                        "Secret key must be exactly 64 bytes, got {}",
                        bytes.len()
                    )));
                }
                let bytes = bytes
                    .iter()
                    .map(|b| u8::try_from(*b))
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|_| {
                        DeployError::invalid_input("Secret key bytes must be between 0 and 255")
                    })?;
                Ok(WalletOption::SecretKey(bytes))
            }
            (None, Some(path), None) => {
                if path.trim().is_empty() {
                    return Err(DeployError::invalid_input("Keypair path must not be empty"));
                }
                Ok(WalletOption::KeypairFile(PathBuf::from(path)))
            }
            (None, None, Some(_)) => Err(DeployError::invalid_input(
                "A wallet address alone cannot sign transactions; supply secret_key or keypair_path",
            )),
            _ => Err(DeployError::invalid_input(
                "Only one of secret_key, keypair_path or address may be supplied",
            )),
        }
    }
}

/// Body of `POST /deploy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub repo_url: String,

    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub wallet: Option<WalletRequest>,
}

/// A deployment request that passed input validation
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub id: String,
    pub repo_url: String,
    pub network: Network,
    pub wallet: WalletOption,
}

impl DeploymentSpec {
    /// Validate a raw request and assign a fresh deployment id
    pub fn from_request(request: &DeployRequest) -> Result<Self, DeployError> {
        let network = match request.network.as_deref() {
            None => Network::default(),
            Some(s) => s.parse()?,
        };

        Ok(Self {
            id: crate::utils::generate_uuid(),
            repo_url: request.repo_url.trim().to_string(),
            network,
            wallet: WalletOption::from_request(request.wallet.as_ref())?,
        })
    }
}

/// Everything a successful deployment reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub program_id: String,
    pub signature: Option<String>,
    pub network: Network,
    pub wallet_address: String,
    /// Finish time, RFC 3339
    pub deployment_time: String,
    /// Start time, RFC 3339
    pub started_at: String,
    pub build_duration_ms: u64,
    pub deploy_duration_ms: u64,
    pub total_duration_ms: u64,
    pub verified: bool,
    pub program_id_source: ExtractionSource,
    pub signature_source: Option<ExtractionSource>,
    pub build_logs: Vec<String>,
    pub deploy_logs: Vec<String>,
}
