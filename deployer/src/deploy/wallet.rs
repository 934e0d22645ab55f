//! Wallet lifecycle: issue, fund, clean up

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::process::{CommandRunner, CommandSpec};
use crate::errors::{DeployError, ErrorKind};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{Network, WalletOption};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::FundingSettings;

/// An airdrop counts once the balance reaches this share of the request
const AIRDROP_ACCEPT_RATIO: f64 = 0.9;

/// An ed25519 keypair in Solana's 64-byte layout (secret || public)
pub struct Keypair {
    bytes: SecretBox<[u8; 64]>,
    address: String,
}

impl Keypair {
    /// Fresh keypair from the OS random number generator
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    /// Rebuild a keypair from 64 raw bytes, checking that the public half
    /// belongs to the secret half
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeployError> {
        let raw: [u8; 64] = bytes.try_into().map_err(|_| {
            DeployError::wallet(format!("Keypair must be 64 bytes, got {}", bytes.len()))
        })?;
        let signing = SigningKey::from_keypair_bytes(&raw)
            .map_err(|e| DeployError::wallet(format!("Invalid keypair bytes: {}", e)))?;
        Ok(Self::from_signing_key(&signing))
    }

    /// Parse the JSON byte array written by `solana-keygen`
    pub fn from_json(contents: &str) -> Result<Self, DeployError> {
        let bytes: Vec<u8> = serde_json::from_str(contents)
            .map_err(|e| DeployError::wallet(format!("Invalid keypair file: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    fn from_signing_key(signing: &SigningKey) -> Self {
        let address = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        Self {
            bytes: SecretBox::new(Box::new(signing.to_keypair_bytes())),
            address,
        }
    }

    /// Base58 public address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// JSON byte array understood by the Solana and Anchor CLIs
    pub fn to_json(&self) -> String {
        let bytes = self.bytes.expose_secret();
        let parts: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
        format!("[{}]", parts.join(","))
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Where a deployment's keypair came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletProvenance {
    Generated,
    SecretKey,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletState {
    Issued,
    Funded,
    Cleaned,
}

/// A keypair owned by one deployment for its lifetime
#[derive(Debug)]
pub struct Wallet {
    keypair: Keypair,
    keypair_file: File,
    provenance: WalletProvenance,
    state: WalletState,
}

impl Wallet {
    pub fn address(&self) -> &str {
        self.keypair.address()
    }

    /// Keypair file passed to every signing command
    pub fn keypair_path(&self) -> &Path {
        self.keypair_file.path()
    }

    pub fn provenance(&self) -> WalletProvenance {
        self.provenance
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    /// Files supplied by the caller are left alone at cleanup
    pub fn is_caller_owned(&self) -> bool {
        self.provenance == WalletProvenance::File
    }
}

/// Issues, funds and destroys deployment wallets
pub struct WalletManager {
    runner: Arc<dyn CommandRunner>,
    layout: StorageLayout,
    funding: FundingSettings,
    cli_timeout: Duration,
}

impl WalletManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        layout: StorageLayout,
        funding: FundingSettings,
        cli_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            layout,
            funding,
            cli_timeout,
        }
    }

    /// Issue the deployment's keypair and persist it with owner-only access
    pub async fn issue(
        &self,
        deployment_id: &str,
        option: &WalletOption,
    ) -> Result<Wallet, DeployError> {
        let (keypair, provenance, keypair_file) = match option {
            WalletOption::Generate => (
                Keypair::generate(),
                WalletProvenance::Generated,
                self.layout.wallet_file(deployment_id),
            ),
            WalletOption::SecretKey(bytes) => (
                Keypair::from_bytes(bytes)
                    .map_err(|e| DeployError::invalid_input(e.message().to_string()))?,
                WalletProvenance::SecretKey,
                self.layout.wallet_file(deployment_id),
            ),
            WalletOption::KeypairFile(path) => {
                let file = File::new(path.clone());
                let contents = file.read_string().await.map_err(|e| {
                    DeployError::wallet(format!(
                        "Failed to read keypair file {}: {}",
                        path.display(),
                        e.message()
                    ))
                })?;
                (Keypair::from_json(&contents)?, WalletProvenance::File, file)
            }
        };

        if provenance != WalletProvenance::File {
            keypair_file
                .write_private(keypair.to_json().as_bytes())
                .await
                .map_err(|e| e.classify(ErrorKind::Wallet, "Failed to persist keypair"))?;
        }

        info!(
            "Wallet issued for deployment {}: {} ({:?})",
            deployment_id,
            keypair.address(),
            provenance
        );

        Ok(Wallet {
            keypair,
            keypair_file,
            provenance,
            state: WalletState::Issued,
        })
    }

    /// Current balance in SOL
    pub async fn balance(&self, address: &str, rpc_url: &str) -> Result<f64, DeployError> {
        let spec = CommandSpec::new("solana", ["balance", address, "--url", rpc_url])
            .timeout(self.cli_timeout);
        let result = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| e.classify(ErrorKind::Network, "Failed to query balance"))?;
        parse_sol_amount(&result.stdout).ok_or_else(|| {
            DeployError::network(format!("Unexpected balance output: {}", result.stdout.trim()))
        })
    }

    /// Make sure the wallet holds at least the minimum balance, airdropping
    /// on networks with a faucet. Returns the final balance.
    pub async fn ensure_funding(
        &self,
        wallet: &mut Wallet,
        network: Network,
        rpc_url: &str,
    ) -> Result<f64, DeployError> {
        let required = self.funding.min_balance_sol;
        let balance = self.balance(wallet.address(), rpc_url).await?;
        debug!("Balance of {}: {} SOL", wallet.address(), balance);

        if balance >= required {
            info!("Wallet already funded with {} SOL", balance);
            wallet.state = WalletState::Funded;
            return Ok(balance);
        }

        if !network.supports_airdrop() {
            return Err(DeployError::insufficient_balance(balance, required));
        }

        let balance = self.airdrop_with_retry(wallet.address(), rpc_url).await?;
        if balance < required {
            return Err(DeployError::insufficient_balance(balance, required));
        }

        info!("Wallet funded with {} SOL", balance);
        wallet.state = WalletState::Funded;
        Ok(balance)
    }

    async fn airdrop_with_retry(&self, address: &str, rpc_url: &str) -> Result<f64, DeployError> {
        let amount = self.funding.airdrop_amount_sol;
        let attempts = self.funding.airdrop_max_attempts.max(1);
        let threshold = amount * AIRDROP_ACCEPT_RATIO;
        let mut last_error = String::new();
        let mut airdrop_error: Option<String> = None;

        for attempt in 1..=attempts {
            info!("Requesting airdrop of {} SOL (attempt {}/{})", amount, attempt, attempts);

            let amount_arg = amount.to_string();
            let spec = CommandSpec::new(
                "solana",
                ["airdrop", amount_arg.as_str(), address, "--url", rpc_url],
            )
            .timeout(self.cli_timeout);
            // The CLI can fail on confirmation while the airdrop still lands,
            // so the balance is re-checked either way
            if let Err(e) = self.runner.run(&spec).await {
                warn!("Airdrop request failed: {}", e);
                airdrop_error = Some(e.message().to_string());
            }

            tokio::time::sleep(self.funding.settle_delay()).await;

            match self.balance(address, rpc_url).await {
                Ok(balance) if balance >= threshold => return Ok(balance),
                Ok(balance) => {
                    warn!(
                        "Balance {} SOL below {} SOL after airdrop attempt {}",
                        balance, threshold, attempt
                    );
                    last_error = format!("balance {} SOL after airdrop", balance);
                }
                Err(e) => {
                    warn!("Balance check after airdrop failed: {}", e);
                    last_error = e.message().to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.funding.retry_delay()).await;
            }
        }

        let message = match &airdrop_error {
            Some(cause) => format!(
                "Airdrop failed after {} attempts: {} (last airdrop error: {})",
                attempts, last_error, cause
            ),
            None => format!("Airdrop failed after {} attempts: {}", attempts, last_error),
        };
        Err(DeployError::network(message).with_details(serde_json::json!({
            "attempts": attempts,
            "requested_sol": amount,
            "airdrop_error": airdrop_error,
        })))
    }

    /// Remove the deployment's keypair file. Never fails.
    pub async fn cleanup(&self, wallet: &mut Wallet) {
        if wallet.state == WalletState::Cleaned {
            return;
        }

        if wallet.is_caller_owned() {
            debug!(
                "Leaving caller-supplied keypair in place: {}",
                wallet.keypair_path().display()
            );
        } else if let Err(e) = wallet.keypair_file.delete().await {
            warn!(
                "Failed to remove keypair file {}: {}",
                wallet.keypair_path().display(),
                e
            );
        }

        wallet.state = WalletState::Cleaned;
    }

    /// Remove a deployment's keypair file by id, for runs that failed before a
    /// `Wallet` existed. Never fails.
    pub async fn cleanup_by_id(&self, deployment_id: &str) {
        let file = self.layout.wallet_file(deployment_id);
        if let Err(e) = file.delete().await {
            warn!("Failed to remove keypair file {}: {}", file.path().display(), e);
        }
    }
}

/// Remove keypair files older than `max_age` left behind by runs that never
/// reached teardown. Every file in the wallet directory was written by this
/// service; caller keypairs are used in place.
pub async fn sweep_stale_keypairs(wallets: &Dir, max_age: Duration) -> Result<usize, DeployError> {
    if !wallets.exists().await {
        return Ok(0);
    }

    let mut removed = 0;
    for path in wallets.list_files("json").await? {
        let file = File::new(path);
        match file.age().await {
            Ok(age) if age > max_age => match file.delete().await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale keypair {}: {}", file.path().display(), e),
            },
            Ok(_) => {}
            Err(e) => warn!("Failed to read age of {}: {}", file.path().display(), e),
        }
    }

    if removed > 0 {
        info!("Swept {} stale keypair files", removed);
    }
    Ok(removed)
}

/// Parse `"1.5 SOL"` (or a bare number) into SOL
pub fn parse_sol_amount(output: &str) -> Option<f64> {
    output
        .lines()
        .rev()
        .filter_map(|line| line.split_whitespace().next())
        .find_map(|token| token.parse::<f64>().ok())
}
