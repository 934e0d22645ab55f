//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Where deployments keep their workspaces and keypairs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Shared root for per-deployment workspaces
    pub temp_root: PathBuf,

    /// Directory for per-deployment keypair files
    pub wallet_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(temp_root: impl Into<PathBuf>, wallet_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            wallet_dir: wallet_dir.into(),
        }
    }

    /// Root directory for all workspaces
    pub fn workspaces_dir(&self) -> Dir {
        Dir::new(&self.temp_root)
    }

    /// Workspace owned by one deployment
    pub fn workspace_dir(&self, deployment_id: &str) -> Dir {
        self.workspaces_dir().subdir(deployment_id)
    }

    /// Directory holding keypair files
    pub fn wallets_dir(&self) -> Dir {
        Dir::new(&self.wallet_dir)
    }

    /// Keypair file owned by one deployment
    pub fn wallet_file(&self, deployment_id: &str) -> File {
        self.wallets_dir().file(&format!("{}.json", deployment_id))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.workspaces_dir().create().await?;
        self.wallets_dir().create().await?;
        Ok(())
    }
}

impl From<&crate::storage::settings::StorageSettings> for StorageLayout {
    fn from(settings: &crate::storage::settings::StorageSettings) -> Self {
        Self::new(&settings.temp_root, &settings.wallet_dir)
    }
}
