//! Cluster configuration

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::deploy::process::{CommandRunner, CommandSpec};
use crate::errors::{DeployError, ErrorKind};
use crate::models::deployment::Network;
use crate::storage::settings::NetworkSettings;

/// Resolves networks to RPC endpoints and checks they answer.
///
/// Nothing is written to the CLI's global config; every later command gets
/// the RPC URL passed explicitly.
pub struct ClusterConfigurator {
    runner: Arc<dyn CommandRunner>,
    networks: NetworkSettings,
    cli_timeout: Duration,
}

impl ClusterConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>, networks: NetworkSettings, cli_timeout: Duration) -> Self {
        Self {
            runner,
            networks,
            cli_timeout,
        }
    }

    /// Resolve `network` and confirm the cluster is reachable. Returns the
    /// RPC URL to use for the rest of the run.
    pub async fn configure(&self, network: Network) -> Result<String, DeployError> {
        let rpc_url = self.networks.rpc_url(network).to_string();
        info!("Configuring cluster {} ({})", network, rpc_url);

        let spec = CommandSpec::new("solana", ["cluster-version", "--url", rpc_url.as_str()])
            .timeout(self.cli_timeout);
        let result = self.runner.run(&spec).await.map_err(|e| {
            e.classify(
                ErrorKind::Network,
                &format!("Cluster {} is not reachable", network),
            )
        })?;

        info!("Cluster {} reachable (version {})", network, result.stdout.trim());
        Ok(rpc_url)
    }
}
