//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ServerSettings, Settings};
use crate::workers::sweeper;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Full deployer settings, handed to the deployment service
    pub settings: Settings,

    /// Server configuration
    pub server: ServerSettings,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the stale workspace sweeper
    pub enable_sweeper: bool,

    /// Sweeper worker options
    pub sweeper: sweeper::Options,

    /// How long running deployments may keep going after shutdown starts
    /// before they are cancelled
    pub deployment_drain_grace: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl From<Settings> for AppOptions {
    fn from(settings: Settings) -> Self {
        Self {
            server: settings.server.clone(),
            layout: StorageLayout::from(&settings.storage),
            enable_sweeper: true,
            sweeper: sweeper::Options {
                interval: settings.sweep.interval(),
                max_age: settings.sweep.max_age(),
            },
            deployment_drain_grace: Duration::from_secs(20),
            max_shutdown_delay: Duration::from_secs(30),
            settings,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from(Settings::default())
    }
}
