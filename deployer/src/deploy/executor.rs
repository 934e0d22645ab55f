//! Deployment pipeline executor
//!
//! Sequences one deployment from clone to verification. Whatever happens in
//! the forward steps, including a panic, the workspace and keypair file are
//! removed before the outcome is returned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::deploy::anchor::{AnchorDriver, BuildOutput, DeployOutput};
use crate::deploy::cluster::ClusterConfigurator;
use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};
use crate::deploy::git::{validate_repo_url, RepositoryFetcher};
use crate::deploy::process::CommandRunner;
use crate::deploy::project;
use crate::deploy::wallet::{Wallet, WalletManager};
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentResult, DeploymentSpec};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::as_millis;

/// Called on every state change of a run
pub type StateObserver<'a> = &'a (dyn Fn(PipelineState) + Send + Sync);

/// What the forward steps hand to result assembly
struct StepOutputs {
    wallet_address: String,
    build: BuildOutput,
    deploy: DeployOutput,
    verified: bool,
}

/// Mutable state of one run, kept outside the forward future so teardown
/// can see what was acquired even after a panic
struct RunContext<'a> {
    fsm: PipelineFsm,
    wallet: Option<Wallet>,
    observer: StateObserver<'a>,
}

impl RunContext<'_> {
    fn enter(&mut self, state: PipelineState) -> Result<(), DeployError> {
        self.fsm
            .process(PipelineEvent::Advance(state))
            .map_err(DeployError::system)?;
        info!("Pipeline step: {}", state);
        (self.observer)(state);
        Ok(())
    }

    fn fail(&mut self, err: &DeployError) {
        match self.fsm.process(PipelineEvent::Fail(err.message().to_string())) {
            Ok(()) => (self.observer)(PipelineState::Failed),
            Err(e) => warn!("{}", e),
        }
    }
}

/// Runs deployments end to end
pub struct DeploymentPipeline {
    layout: StorageLayout,
    allowed_hosts: Vec<String>,
    fetcher: RepositoryFetcher,
    cluster: ClusterConfigurator,
    wallets: WalletManager,
    driver: AnchorDriver,
    cancel: watch::Sender<bool>,
}

impl DeploymentPipeline {
    pub fn new(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Self {
        let layout = StorageLayout::from(&settings.storage);
        let timeouts = &settings.timeouts_secs;

        Self {
            allowed_hosts: settings.allowed_hosts.clone(),
            fetcher: RepositoryFetcher::new(
                runner.clone(),
                layout.clone(),
                timeouts.clone_timeout(),
                settings.limits.max_repo_size_bytes,
            ),
            cluster: ClusterConfigurator::new(
                runner.clone(),
                settings.networks.clone(),
                timeouts.cli_timeout(),
            ),
            wallets: WalletManager::new(
                runner.clone(),
                layout.clone(),
                settings.funding.clone(),
                timeouts.cli_timeout(),
            ),
            driver: AnchorDriver::new(
                runner,
                timeouts.build_timeout(),
                timeouts.deploy_timeout(),
                timeouts.cli_timeout(),
            ),
            layout,
            cancel: watch::channel(false).0,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Abort every current and future run at its next step boundary or
    /// command. Aborted runs still tear down.
    pub fn cancel_all(&self) {
        self.cancel.send_replace(true);
    }

    /// Run one deployment. `observer` sees every state the run enters.
    pub async fn run(
        &self,
        spec: &DeploymentSpec,
        observer: StateObserver<'_>,
    ) -> Result<DeploymentResult, DeployError> {
        info!(
            "Starting deployment {} of {} to {}",
            spec.id, spec.repo_url, spec.network
        );
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut ctx = RunContext {
            fsm: PipelineFsm::new(),
            wallet: None,
            observer,
        };

        let mut cancel = self.cancel.subscribe();
        let cancelled = async move {
            let _ = cancel.wait_for(|cancelled| *cancelled).await;
        };
        let caught = tokio::select! {
            caught = AssertUnwindSafe(self.forward(spec, &mut ctx)).catch_unwind() => caught,
            _ = cancelled => Ok(Err(DeployError::system("Deployment cancelled by shutdown"))),
        };
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(panic) => Err(DeployError::system(format!(
                "Deployment step {} panicked: {}",
                ctx.fsm.state(),
                panic_message(panic.as_ref())
            ))),
        };

        self.teardown(spec, &mut ctx).await;

        match outcome {
            Ok(outputs) => {
                ctx.enter(PipelineState::Done)?;
                let result = assemble(spec, outputs, started_at, clock);
                info!(
                    "Deployment {} finished: program {} in {} ms",
                    spec.id, result.program_id, result.total_duration_ms
                );
                Ok(result)
            }
            Err(err) => {
                ctx.fail(&err);
                error!(
                    "Deployment {} failed at {}: {}",
                    spec.id,
                    ctx.fsm.failed_at().unwrap_or(PipelineState::Pending),
                    err
                );
                Err(err)
            }
        }
    }

    async fn forward(
        &self,
        spec: &DeploymentSpec,
        ctx: &mut RunContext<'_>,
    ) -> Result<StepOutputs, DeployError> {
        let repo_url = validate_repo_url(&spec.repo_url, &self.allowed_hosts)?;

        ctx.enter(PipelineState::Cloning)?;
        let workspace = self.fetcher.clone(&repo_url, &spec.id).await?;

        ctx.enter(PipelineState::Validating)?;
        project::validate(&workspace, spec.network).await?;

        ctx.enter(PipelineState::ConfiguringCluster)?;
        let rpc_url = self.cluster.configure(spec.network).await?;

        ctx.enter(PipelineState::SettingUpWallet)?;
        ctx.wallet = Some(self.wallets.issue(&spec.id, &spec.wallet).await?);

        ctx.enter(PipelineState::Funding)?;
        let (wallet_address, keypair_path) = match ctx.wallet.as_mut() {
            Some(wallet) => {
                self.wallets
                    .ensure_funding(wallet, spec.network, &rpc_url)
                    .await?;
                (wallet.address().to_string(), wallet.keypair_path().to_path_buf())
            }
            None => return Err(DeployError::system("No wallet issued for deployment")),
        };

        ctx.enter(PipelineState::Building)?;
        let build = self.driver.build(&workspace).await?;

        ctx.enter(PipelineState::Deploying)?;
        let deploy = self.driver.deploy(&workspace, &keypair_path, &rpc_url).await?;

        ctx.enter(PipelineState::Verifying)?;
        let verified = self.driver.verify(&deploy.program_id.value, &rpc_url).await;

        Ok(StepOutputs {
            wallet_address,
            build,
            deploy,
            verified,
        })
    }

    async fn teardown(&self, spec: &DeploymentSpec, ctx: &mut RunContext<'_>) {
        let workspace = self.layout.workspace_dir(&spec.id);
        if let Err(e) = workspace.delete().await {
            warn!(
                "Failed to remove workspace {}: {}",
                workspace.path().display(),
                e
            );
        }

        match ctx.wallet.as_mut() {
            Some(wallet) => self.wallets.cleanup(wallet).await,
            None => self.wallets.cleanup_by_id(&spec.id).await,
        }
    }
}

fn assemble(
    spec: &DeploymentSpec,
    outputs: StepOutputs,
    started_at: DateTime<Utc>,
    clock: Instant,
) -> DeploymentResult {
    DeploymentResult {
        program_id: outputs.deploy.program_id.value,
        signature: outputs.deploy.signature.as_ref().map(|s| s.value.clone()),
        network: spec.network,
        wallet_address: outputs.wallet_address,
        deployment_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        build_duration_ms: as_millis(outputs.build.duration),
        deploy_duration_ms: as_millis(outputs.deploy.duration),
        total_duration_ms: as_millis(clock.elapsed()),
        verified: outputs.verified,
        program_id_source: outputs.deploy.program_id.source,
        signature_source: outputs.deploy.signature.map(|s| s.source),
        build_logs: outputs.build.log_tail,
        deploy_logs: outputs.deploy.log_tail,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
