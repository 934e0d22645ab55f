//! Scripted command runner and fixtures shared by the integration tests

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_deployer::deploy::executor::DeploymentPipeline;
use anchor_deployer::deploy::fsm::PipelineState;
use anchor_deployer::deploy::process::{CommandRunner, CommandSpec, ProcessExecutor, ProcessResult};
use anchor_deployer::errors::DeployError;
use anchor_deployer::models::deployment::{DeploymentSpec, Network, WalletOption};
use anchor_deployer::storage::settings::Settings;
use anchor_deployer::utils::generate_uuid;
use async_trait::async_trait;
use tempfile::TempDir;

pub const REPO_URL: &str = "https://github.com/acme/counter";
pub const PROGRAM_ID: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";
pub const SIGNATURE: &str =
    "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";

pub const ANCHOR_TOML: &str = r#"[toolchain]
anchor_version = "0.30.1"

[programs.devnet]
counter = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS"

[provider]
cluster = "devnet"
wallet = "~/.config/solana/id.json"
"#;

/// What a scripted command does
#[derive(Clone)]
pub enum Reply {
    /// Exit 0 with this stdout
    Output(String),

    /// Exit 0 with this stdout after a delay
    Slow(Duration, String),

    /// Fail with this error
    Fail(DeployError),

    /// Panic inside the runner
    Panic(&'static str),

    /// Populate the clone target (last argument) with files, exit 0
    Checkout(Vec<(&'static str, &'static str)>),

    /// Run a real command instead, with the scripted command's timeout and cwd
    Exec(CommandSpec),
}

pub fn output(stdout: &str) -> Reply {
    Reply::Output(stdout.to_string())
}

pub fn anchor_project() -> Reply {
    Reply::Checkout(vec![
        ("Anchor.toml", ANCHOR_TOML),
        ("programs/counter/src/lib.rs", "use anchor_lang::prelude::*;\n"),
    ])
}

pub fn plain_repo() -> Reply {
    Reply::Checkout(vec![("README.md", "# not an anchor project\n")])
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    replies: VecDeque<Reply>,
}

/// `CommandRunner` that answers from a script and records every call.
///
/// Rules match on program and leading arguments. Each rule plays its replies
/// in order and repeats the last one. Unscripted commands fail.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for commands starting with `program prefix..`
    pub fn on(&self, program: &str, prefix: &[&str], reply: Reply) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        match rules
            .iter_mut()
            .find(|r| r.program == program && r.prefix == prefix)
        {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                program: program.to_string(),
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// How many recorded calls start with `program prefix..`
    pub fn count(&self, program: &str, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.matches(program, prefix))
            .count()
    }

    /// Highest number of commands that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, spec: &CommandSpec) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| {
            let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
            spec.matches(&r.program, &prefix)
        })?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }

    async fn play(&self, spec: &CommandSpec) -> Result<ProcessResult, DeployError> {
        let reply = self.next_reply(spec).ok_or_else(|| {
            DeployError::system(format!("Unscripted command: {}", spec.display()))
        })?;

        match reply {
            Reply::Output(stdout) => Ok(result(stdout)),
            Reply::Slow(delay, stdout) => {
                tokio::time::sleep(delay).await;
                Ok(result(stdout))
            }
            Reply::Fail(err) => Err(err),
            Reply::Panic(message) => panic!("{}", message),
            Reply::Checkout(files) => {
                let target = PathBuf::from(spec.args.last().expect("clone target"));
                for (relative, contents) in files {
                    let path = target.join(relative);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(path, contents).unwrap();
                }
                Ok(result(format!("Cloning into '{}'...", target.display())))
            }
            Reply::Exec(mut substitute) => {
                substitute.timeout = spec.timeout;
                substitute.cwd = spec.cwd.clone();
                ProcessExecutor::new().run(&substitute).await
            }
        }
    }
}

fn result(stdout: String) -> ProcessResult {
    ProcessResult {
        exit_code: 0,
        logs: stdout.lines().map(String::from).collect(),
        stdout,
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult, DeployError> {
        self.calls.lock().unwrap().push(spec.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let outcome = self.play(spec).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Script every step of a successful devnet deployment that needs one airdrop
pub fn script_happy_path(runner: &ScriptedRunner) {
    runner
        .on("git", &["clone"], anchor_project())
        .on("solana", &["cluster-version"], output("1.18.26"))
        .on("solana", &["balance"], output("0 SOL"))
        .on("solana", &["balance"], output("2 SOL"))
        .on("solana", &["airdrop"], output(&format!("Requesting airdrop of 2 SOL\n\nSignature: {}\n\n2 SOL", SIGNATURE)))
        .on(
            "anchor",
            &["build"],
            output("   Compiling counter v0.1.0\n    Finished release [optimized] target(s)"),
        )
        .on(
            "anchor",
            &["deploy"],
            output(&format!(
                "Deploying cluster: https://api.devnet.solana.com\n\
                 Upgrade authority: /tmp/wallet.json\n\
                 Deploying program \"counter\"...\n\
                 Program Id: {}\n\
                 Signature: {}\n\
                 Deploy success",
                PROGRAM_ID, SIGNATURE
            )),
        )
        .on("solana", &["program", "show"], output(&format!("Program Id: {}\nOwner: BPFLoaderUpgradeab1e11111111111111111111111", PROGRAM_ID)));
}

/// Scratch directories plus settings pointing into them
pub struct TestEnv {
    pub tmp: TempDir,
    pub settings: Settings,
    pub runner: Arc<ScriptedRunner>,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage.temp_root = tmp.path().join("workspaces");
        settings.storage.wallet_dir = tmp.path().join("wallets");
        settings.funding.airdrop_retry_delay_ms = 0;
        settings.funding.airdrop_settle_delay_ms = 0;

        Self {
            tmp,
            settings,
            runner: Arc::new(ScriptedRunner::new()),
        }
    }

    pub fn pipeline(&self) -> DeploymentPipeline {
        DeploymentPipeline::new(&self.settings, self.runner.clone())
    }

    pub fn workspace(&self, deployment_id: &str) -> PathBuf {
        self.settings.storage.temp_root.join(deployment_id)
    }

    pub fn wallet_file(&self, deployment_id: &str) -> PathBuf {
        self.settings
            .storage
            .wallet_dir
            .join(format!("{}.json", deployment_id))
    }

    /// Nothing the deployment owned is left on disk
    pub fn assert_cleaned(&self, deployment_id: &str) {
        assert!(
            !self.workspace(deployment_id).exists(),
            "workspace left behind"
        );
        assert!(
            !self.wallet_file(deployment_id).exists(),
            "keypair file left behind"
        );
    }
}

pub fn deployment(network: Network, wallet: WalletOption) -> DeploymentSpec {
    DeploymentSpec {
        id: generate_uuid(),
        repo_url: REPO_URL.to_string(),
        network,
        wallet,
    }
}

pub fn ignore_state(_: PipelineState) {}

#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(false),
        Err(_) => false,
    }
}
