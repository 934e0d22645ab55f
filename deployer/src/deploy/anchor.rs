//! Build and deploy driver for the Anchor toolchain

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::extract::{Extraction, IdExtractor};
use crate::deploy::process::{CommandRunner, CommandSpec, ProcessResult};
use crate::errors::{DeployError, ErrorKind};
use crate::filesys::dir::Dir;
use crate::utils::tail;

/// Output lines kept per phase in results
pub const LOG_TAIL_LINES: usize = 50;

/// Matched lines kept in a condensed diagnostic
const MAX_DIAGNOSTIC_LINES: usize = 20;

const BUILD_MARKERS: &[&str] = &["error[", "error:", "could not find", "cannot find", "Error:"];
const DEPLOY_MARKERS: &[&str] = &["Error:", "error:"];
const RPC_MARKERS: &[&str] = &["rpc", "connection refused", "timed out", "429", "blockhash"];
const BALANCE_MARKERS: &[&str] = &["insufficient", "balance"];

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub log_tail: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct DeployOutput {
    pub program_id: Extraction,
    pub signature: Option<Extraction>,
    pub log_tail: Vec<String>,
    pub duration: Duration,
}

/// Runs `anchor build` / `anchor deploy` and reads their output
pub struct AnchorDriver {
    runner: Arc<dyn CommandRunner>,
    build_timeout: Duration,
    deploy_timeout: Duration,
    cli_timeout: Duration,
}

impl AnchorDriver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        build_timeout: Duration,
        deploy_timeout: Duration,
        cli_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            build_timeout,
            deploy_timeout,
            cli_timeout,
        }
    }

    pub async fn build(&self, workspace: &Dir) -> Result<BuildOutput, DeployError> {
        info!("Building program in {}", workspace.path().display());

        let spec = CommandSpec::new("anchor", ["build"])
            .current_dir(workspace.path())
            .env("CARGO_TERM_COLOR", "never")
            .env("NO_COLOR", "1")
            .timeout(self.build_timeout)
            .stream_to_log(true);

        match self.runner.run(&spec).await {
            Ok(result) => {
                info!("Build finished in {:?}", result.duration);
                Ok(BuildOutput {
                    log_tail: tail(&result.logs, LOG_TAIL_LINES),
                    duration: result.duration,
                })
            }
            Err(e) if e.kind() == ErrorKind::Timeout => Err(e),
            Err(e) => {
                let diagnostic = condense(e.logs(), &[BUILD_MARKERS])
                    .unwrap_or_else(|| "Unknown build error".to_string());
                warn!("Build failed: {}", diagnostic);
                Err(DeployError::build(diagnostic)
                    .with_details(serde_json::json!({ "cause": e.message() }))
                    .with_logs(e.logs().to_vec()))
            }
        }
    }

    /// Deploy with the deployment's own keypair and RPC endpoint
    pub async fn deploy(
        &self,
        workspace: &Dir,
        keypair_path: &Path,
        rpc_url: &str,
    ) -> Result<DeployOutput, DeployError> {
        info!("Deploying program from {} to {}", workspace.path().display(), rpc_url);

        let keypair = keypair_path.to_string_lossy().to_string();
        let spec = CommandSpec::new(
            "anchor",
            [
                "deploy",
                "--provider.cluster",
                rpc_url,
                "--provider.wallet",
                keypair.as_str(),
            ],
        )
        .current_dir(workspace.path())
        .env("NO_COLOR", "1")
        .timeout(self.deploy_timeout)
        .stream_to_log(true);

        let result = match self.runner.run(&spec).await {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::Timeout => return Err(e),
            Err(e) => return Err(deploy_failure(e.logs(), Some(e.message()))),
        };

        extract_identifiers(&result).ok_or_else(|| deploy_failure(&result.logs, None))
    }

    /// Whether the program is visible on-chain. Failures count as `false`.
    pub async fn verify(&self, program_id: &str, rpc_url: &str) -> bool {
        let spec = CommandSpec::new("solana", ["program", "show", program_id, "--url", rpc_url])
            .timeout(self.cli_timeout);
        match self.runner.run(&spec).await {
            Ok(result) => {
                let found = result.stdout.contains(program_id);
                if !found {
                    warn!("Program {} not listed by `solana program show`", program_id);
                }
                found
            }
            Err(e) => {
                warn!("Verification of {} failed: {}", program_id, e);
                false
            }
        }
    }
}

fn extract_identifiers(result: &ProcessResult) -> Option<DeployOutput> {
    let output = result.combined_output();
    let program_id = IdExtractor::program_id().extract(&output)?;
    if program_id.is_ambiguous() {
        warn!(
            "Program id {} picked by positional fallback among several candidates",
            program_id.value
        );
    }

    let signature = IdExtractor::signature().extract(&output);
    if signature.is_none() {
        warn!("No transaction signature found in deploy output");
    }

    info!("Program deployed: {}", program_id.value);
    Some(DeployOutput {
        program_id,
        signature,
        log_tail: tail(&result.logs, LOG_TAIL_LINES),
        duration: result.duration,
    })
}

fn deploy_failure(lines: &[String], cause: Option<&str>) -> DeployError {
    let diagnostic = condense(lines, &[DEPLOY_MARKERS, RPC_MARKERS, BALANCE_MARKERS])
        .unwrap_or_else(|| match cause {
            Some(_) => "Unknown deployment error".to_string(),
            None => "Deploy finished but no program id was found in its output".to_string(),
        });
    warn!("Deploy failed: {}", diagnostic);

    let mut err = DeployError::deployment(diagnostic).with_logs(lines.to_vec());
    if let Some(cause) = cause {
        err = err.with_details(serde_json::json!({ "cause": cause }));
    }
    err
}

/// Lines matching any marker (case-insensitive for lowercase markers),
/// de-duplicated and joined. `None` when nothing matched.
pub fn condense(lines: &[String], marker_sets: &[&[&str]]) -> Option<String> {
    let mut matched: Vec<&str> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || matched.contains(&trimmed) {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let hit = marker_sets.iter().flat_map(|set| set.iter()).any(|marker| {
            if marker.chars().any(char::is_uppercase) {
                trimmed.contains(marker)
            } else {
                lower.contains(marker)
            }
        });
        if hit {
            matched.push(trimmed);
            if matched.len() == MAX_DIAGNOSTIC_LINES {
                break;
            }
        }
    }

    (!matched.is_empty()).then(|| matched.join("\n"))
}
