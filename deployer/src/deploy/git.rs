//! Repository acquisition

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::deploy::process::{CommandRunner, CommandSpec};
use crate::errors::{DeployError, ErrorKind};
use crate::filesys::dir::Dir;
use crate::storage::layout::StorageLayout;

/// Validate a repository reference before anything touches the network.
///
/// Accepts `https://<allowed host>/<owner>/<repo>[.git]` only. Returns the
/// normalized URL handed to `git clone`.
pub fn validate_repo_url(reference: &str, allowed_hosts: &[String]) -> Result<String, DeployError> {
    let url = Url::parse(reference.trim())
        .map_err(|e| DeployError::invalid_input(format!("Invalid repository URL: {}", e)))?;

    if url.scheme() != "https" {
        return Err(DeployError::invalid_input(
            "Repository URL must use https",
        ));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(DeployError::invalid_input(
            "Repository URL must not contain credentials",
        ));
    }
    if url.query().is_some() || url.fragment().is_some() || url.port().is_some() {
        return Err(DeployError::invalid_input(
            "Repository URL must not contain a port, query or fragment",
        ));
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    if !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        return Err(DeployError::invalid_input(format!(
            "Repository host '{}' is not allowed (allowed: {})",
            host,
            allowed_hosts.join(", ")
        )));
    }

    let segments: Vec<&str> = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() != 2 {
        return Err(DeployError::invalid_input(
            "Repository URL must have the form https://<host>/<owner>/<repo>",
        ));
    }
    for segment in &segments {
        let valid = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid || segment.starts_with('.') {
            return Err(DeployError::invalid_input(format!(
                "Invalid repository path segment: {}",
                segment
            )));
        }
    }

    Ok(format!("https://{}/{}/{}", host, segments[0], segments[1]))
}

/// Clones repositories into per-deployment workspaces
pub struct RepositoryFetcher {
    runner: Arc<dyn CommandRunner>,
    layout: StorageLayout,
    clone_timeout: Duration,
    max_size_bytes: u64,
}

impl RepositoryFetcher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        layout: StorageLayout,
        clone_timeout: Duration,
        max_size_bytes: u64,
    ) -> Self {
        Self {
            runner,
            layout,
            clone_timeout,
            max_size_bytes,
        }
    }

    /// Shallow-clone `repo_url` into the deployment's workspace
    pub async fn clone(&self, repo_url: &str, deployment_id: &str) -> Result<Dir, DeployError> {
        info!("Cloning repository: {} (deployment: {})", repo_url, deployment_id);

        self.layout
            .workspaces_dir()
            .create()
            .await
            .map_err(|e| e.classify(ErrorKind::Clone, "Failed to create workspace root"))?;

        let workspace = self.layout.workspace_dir(deployment_id);
        if workspace.exists().await {
            debug!("Workspace already exists, removing: {}", workspace.path().display());
            workspace
                .delete()
                .await
                .map_err(|e| e.classify(ErrorKind::Clone, "Failed to clear workspace"))?;
        }

        let target = workspace.path().to_string_lossy().to_string();
        let spec = CommandSpec::new(
            "git",
            [
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--no-tags",
                repo_url,
                target.as_str(),
            ],
        )
        .env("GIT_TERMINAL_PROMPT", "0")
        .timeout(self.clone_timeout);

        if let Err(e) = self.runner.run(&spec).await {
            if let Err(cleanup) = workspace.delete().await {
                warn!("Failed to remove partial clone: {}", cleanup);
            }
            return Err(e.classify(ErrorKind::Clone, "Failed to clone repository"));
        }

        let size = workspace
            .size_bytes()
            .await
            .map_err(|e| e.classify(ErrorKind::Clone, "Failed to measure repository size"))?;

        if size > self.max_size_bytes {
            if let Err(e) = workspace.delete().await {
                warn!("Failed to remove oversized workspace: {}", e);
            }
            return Err(DeployError::clone_failed(format!(
                "Repository is too large: {} bytes (limit {} bytes)",
                size, self.max_size_bytes
            ))
            .with_details(serde_json::json!({
                "size_bytes": size,
                "max_bytes": self.max_size_bytes,
            })));
        }

        info!(
            "Repository cloned to {} ({} bytes)",
            workspace.path().display(),
            size
        );
        Ok(workspace)
    }
}

/// Remove workspace directories older than `max_age`. Returns how many were
/// removed; individual failures are logged and skipped.
pub async fn sweep_stale(root: &Dir, max_age: Duration) -> Result<usize, DeployError> {
    if !root.exists().await {
        return Ok(0);
    }

    let mut removed = 0;
    for path in root.list_dirs().await? {
        let dir = Dir::new(path);
        match dir.age().await {
            Ok(age) if age > max_age => {
                debug!("Removing stale workspace {} (age {:?})", dir.path().display(), age);
                match dir.delete().await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale workspace {}: {}", dir.path().display(), e),
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read age of {}: {}", dir.path().display(), e),
        }
    }

    if removed > 0 {
        info!("Swept {} stale workspaces", removed);
    }
    Ok(removed)
}
