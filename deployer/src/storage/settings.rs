//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::Network;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to a daily rolling file under `log_dir`
    #[serde(default)]
    pub log_to_file: bool,

    /// Log directory for file output
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// "production" hides unclassified error messages from callers
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Filesystem locations
    #[serde(default)]
    pub storage: StorageSettings,

    /// Resource limits
    #[serde(default)]
    pub limits: LimitSettings,

    /// Per-command time limits
    #[serde(default)]
    pub timeouts_secs: TimeoutSettings,

    /// Wallet funding policy
    #[serde(default)]
    pub funding: FundingSettings,

    /// RPC endpoints per network
    #[serde(default)]
    pub networks: NetworkSettings,

    /// Hosts a repository may be cloned from
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// Stale workspace sweeping
    #[serde(default)]
    pub sweep: SweepSettings,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/anchor-deployer")
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_allowed_hosts() -> Vec<String> {
    vec![
        "github.com".to_string(),
        "gitlab.com".to_string(),
        "bitbucket.org".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            log_dir: default_log_dir(),
            environment: default_environment(),
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            limits: LimitSettings::default(),
            timeouts_secs: TimeoutSettings::default(),
            funding: FundingSettings::default(),
            networks: NetworkSettings::default(),
            allowed_hosts: default_allowed_hosts(),
            sweep: SweepSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when the file
    /// does not exist. A file that exists but does not parse is an error.
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            warn!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }

        let contents = file.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| {
            DeployError::system(format!(
                "Invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root under which each deployment gets its workspace
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,

    /// Directory holding per-deployment keypair files
    #[serde(default = "default_wallet_dir")]
    pub wallet_dir: PathBuf,
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("anchor-deployer")
}

fn default_wallet_dir() -> PathBuf {
    std::env::temp_dir().join("anchor-deployer-wallets")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            wallet_dir: default_wallet_dir(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Largest cloned repository accepted, in bytes
    #[serde(default = "default_max_repo_size")]
    pub max_repo_size_bytes: u64,

    /// Deployments allowed to run at once in this process
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,

    /// Finished deployments kept for status queries
    #[serde(default = "default_status_retention")]
    pub status_retention: usize,
}

fn default_max_repo_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_concurrent() -> usize {
    3
}

fn default_status_retention() -> usize {
    100
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_repo_size_bytes: default_max_repo_size(),
            max_concurrent_deployments: default_max_concurrent(),
            status_retention: default_status_retention(),
        }
    }
}

/// Per-command time limits in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_clone_timeout")]
    pub clone: u64,

    #[serde(default = "default_build_timeout")]
    pub build: u64,

    #[serde(default = "default_deploy_timeout")]
    pub deploy: u64,

    /// Short `solana` CLI calls (balance, airdrop, cluster-version, program show)
    #[serde(default = "default_cli_timeout")]
    pub cli: u64,
}

fn default_clone_timeout() -> u64 {
    120
}

fn default_build_timeout() -> u64 {
    600
}

fn default_deploy_timeout() -> u64 {
    300
}

fn default_cli_timeout() -> u64 {
    60
}

impl TimeoutSettings {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy)
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            clone: default_clone_timeout(),
            build: default_build_timeout(),
            deploy: default_deploy_timeout(),
            cli: default_cli_timeout(),
        }
    }
}

/// Wallet funding policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettings {
    /// Balance a wallet must hold before building
    #[serde(default = "default_min_balance")]
    pub min_balance_sol: f64,

    /// Amount requested per airdrop
    #[serde(default = "default_airdrop_amount")]
    pub airdrop_amount_sol: f64,

    #[serde(default = "default_airdrop_attempts")]
    pub airdrop_max_attempts: u32,

    /// Delay between failed airdrop attempts
    #[serde(default = "default_airdrop_retry_delay")]
    pub airdrop_retry_delay_ms: u64,

    /// Delay between an airdrop and the balance re-check
    #[serde(default = "default_airdrop_settle_delay")]
    pub airdrop_settle_delay_ms: u64,
}

fn default_min_balance() -> f64 {
    2.0
}

fn default_airdrop_amount() -> f64 {
    2.0
}

fn default_airdrop_attempts() -> u32 {
    3
}

fn default_airdrop_retry_delay() -> u64 {
    5_000
}

fn default_airdrop_settle_delay() -> u64 {
    3_000
}

impl FundingSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.airdrop_retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.airdrop_settle_delay_ms)
    }
}

impl Default for FundingSettings {
    fn default() -> Self {
        Self {
            min_balance_sol: default_min_balance(),
            airdrop_amount_sol: default_airdrop_amount(),
            airdrop_max_attempts: default_airdrop_attempts(),
            airdrop_retry_delay_ms: default_airdrop_retry_delay(),
            airdrop_settle_delay_ms: default_airdrop_settle_delay(),
        }
    }
}

/// RPC endpoints per network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_devnet_url")]
    pub devnet: String,

    #[serde(default = "default_testnet_url")]
    pub testnet: String,

    #[serde(default = "default_mainnet_url")]
    pub mainnet_beta: String,
}

fn default_devnet_url() -> String {
    "https://api.devnet.solana.com".to_string()
}

fn default_testnet_url() -> String {
    "https://api.testnet.solana.com".to_string()
}

fn default_mainnet_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

impl NetworkSettings {
    pub fn rpc_url(&self, network: Network) -> &str {
        match network {
            Network::Devnet => &self.devnet,
            Network::Testnet => &self.testnet,
            Network::MainnetBeta => &self.mainnet_beta,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            devnet: default_devnet_url(),
            testnet: default_testnet_url(),
            mainnet_beta: default_mainnet_url(),
        }
    }
}

/// Stale workspace sweeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_sweep_max_age")]
    pub max_age_secs: u64,
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_sweep_max_age() -> u64 {
    24 * 3600
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            max_age_secs: default_sweep_max_age(),
        }
    }
}

impl SweepSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}
