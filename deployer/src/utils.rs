//! Utility functions

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deploy::process::{CommandRunner, CommandSpec};

/// Tools the pipeline shells out to, with the arguments used to probe them
const REQUIRED_TOOLS: &[(&str, &[&str])] = &[
    ("git", &["--version"]),
    ("solana", &["--version"]),
    ("anchor", &["--version"]),
];

/// Version information for the deployer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The last `n` lines
pub fn tail(lines: &[String], n: usize) -> Vec<String> {
    lines[lines.len().saturating_sub(n)..].to_vec()
}

/// Whole milliseconds, saturating
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Check that every external tool is callable. Prints one line per tool and
/// returns whether all of them answered.
pub async fn run_diagnostic(runner: &dyn CommandRunner) -> bool {
    let mut healthy = true;
    for (program, args) in REQUIRED_TOOLS {
        let spec = CommandSpec::new(program, args.iter().copied()).timeout(Duration::from_secs(10));
        match runner.run(&spec).await {
            Ok(result) => {
                let version = result.stdout.lines().next().unwrap_or("").trim().to_string();
                println!("{} {:<8} {}", "OK".green().bold(), program, version);
            }
            Err(e) => {
                healthy = false;
                println!("{} {:<8} {}", "MISSING".red().bold(), program, e.message());
            }
        }
    }
    healthy
}
