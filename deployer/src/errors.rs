//! Error types for the deployer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fixed taxonomy of deployment failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request input rejected before any work started
    InvalidInput,

    /// Repository could not be acquired
    Clone,

    /// Workspace does not look like an Anchor project
    InvalidProject,

    /// `anchor build` failed
    Build,

    /// `anchor deploy` failed or produced no program id
    Deployment,

    /// Keypair issuance or persistence failed
    Wallet,

    /// Cluster unreachable or faucet exhausted
    Network,

    /// An external command exceeded its time limit
    Timeout,

    /// Wallet balance below the required minimum
    InsufficientBalance,

    /// Anything unclassified
    System,
}

impl ErrorKind {
    /// Wire code used in HTTP error bodies
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Clone => "CLONE_ERROR",
            Self::InvalidProject => "INVALID_PROJECT",
            Self::Build => "BUILD_ERROR",
            Self::Deployment => "DEPLOYMENT_ERROR",
            Self::Wallet => "WALLET_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::System => "SYSTEM_ERROR",
        }
    }

    /// HTTP status code the kind surfaces as
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput | Self::Clone | Self::InvalidProject => 400,
            Self::InsufficientBalance => 402,
            Self::Timeout => 408,
            Self::Build => 422,
            Self::Deployment | Self::Wallet | Self::System => 500,
            Self::Network => 503,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type for the deployer.
///
/// A single record for every failure: the kind decides how callers and the
/// HTTP layer treat it, the payload travels with it unchanged.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DeployError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
    logs: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl DeployError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            logs: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn clone_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Clone, message)
    }

    pub fn invalid_project(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidProject, message)
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build, message)
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deployment, message)
    }

    pub fn wallet(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Wallet, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn insufficient_balance(current: f64, required: f64) -> Self {
        Self::new(
            ErrorKind::InsufficientBalance,
            format!(
                "Insufficient balance: {} SOL available, {} SOL required",
                current, required
            ),
        )
        .with_details(serde_json::json!({
            "current_balance": current,
            "required_balance": required,
        }))
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message)
    }

    /// Attach structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach captured log lines
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Keep the error if it is already classified, otherwise re-classify it
    /// as `kind` with `context` prefixed to the message. Logs and details are
    /// preserved either way.
    pub fn classify(self, kind: ErrorKind, context: &str) -> Self {
        match self.kind {
            ErrorKind::System => Self {
                kind,
                message: format!("{}: {}", context, self.message),
                ..self
            },
            _ => self,
        }
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        DeployError::system(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::system(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::system(err.to_string())
    }
}
