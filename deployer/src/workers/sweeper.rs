//! Sweeper worker for stale workspaces and keypair files

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::git::sweep_stale;
use crate::deploy::wallet::sweep_stale_keypairs;
use crate::storage::layout::StorageLayout;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Workspaces and keypair files older than this are removed
    pub max_age: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_age: Duration::from_secs(24 * 3600),
        }
    }
}

/// Run the sweeper worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    layout: &StorageLayout,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let workspaces = layout.workspaces_dir();
        debug!("Sweeping {}", workspaces.path().display());
        if let Err(e) = sweep_stale(&workspaces, options.max_age).await {
            error!("Workspace sweep failed: {}", e);
        }

        if let Err(e) = sweep_stale_keypairs(&layout.wallets_dir(), options.max_age).await {
            error!("Keypair sweep failed: {}", e);
        }
    }
}
