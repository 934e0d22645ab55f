//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::deploy::process::{CommandRunner, ProcessExecutor};
use crate::errors::DeployError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::services::deployment::DeploymentService;
use crate::workers::sweeper;

/// Run the deployer until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing Anchor Deployer...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), &options);

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessExecutor::new());
    if let Err(e) = init(&options, runner, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start deployer: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    runner: Arc<dyn CommandRunner>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployError> {
    options.layout.setup().await?;

    if options.enable_sweeper {
        init_sweeper_worker(options, shutdown_manager, shutdown_tx.subscribe());
    }

    let service = Arc::new(DeploymentService::new(&options.settings, runner));
    shutdown_manager.deployments = Some(service.clone());
    init_server(options, service, shutdown_manager, shutdown_tx.subscribe()).await
}

fn init_sweeper_worker(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Initializing sweeper worker...");

    let sweeper_options = options.sweeper.clone();
    let layout = options.layout.clone();
    let handle = tokio::spawn(async move {
        sweeper::run(
            &sweeper_options,
            &layout,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.sweeper_handle = Some(handle);
}

async fn init_server(
    options: &AppOptions,
    service: Arc<DeploymentService>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing HTTP server...");

    let state = ServerState::new(service, options.settings.is_production());
    let handle = serve(&options.server, Arc::new(state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.server_handle = Some(handle);
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: std::time::Duration,
    deployment_drain_grace: std::time::Duration,
    deployments: Option<Arc<DeploymentService>>,
    server_handle: Option<JoinHandle<Result<(), DeployError>>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, options: &AppOptions) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay: options.max_shutdown_delay,
            deployment_drain_grace: options.deployment_drain_grace,
            deployments: None,
            server_handle: None,
            sweeper_handle: None,
        }
    }

    async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down Anchor Deployer...");

        // 1. Sweeper worker
        if let Some(handle) = self.sweeper_handle.take() {
            handle
                .await
                .map_err(|e| DeployError::system(format!("Sweeper worker failed: {}", e)))?;
        }

        // 2. Running deployments, so their requests can answer
        if let Some(deployments) = self.deployments.take() {
            deployments.drain(self.deployment_drain_grace).await;
        }

        // 3. HTTP server, which lets in-flight requests finish
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| DeployError::system(format!("HTTP server task failed: {}", e)))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
