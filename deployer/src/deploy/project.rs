//! Anchor project validation

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::deployment::Network;

pub const MANIFEST_FILE: &str = "Anchor.toml";
pub const PROGRAMS_DIR: &str = "programs";

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*\[\s*([A-Za-z0-9_.\-"]+)\s*\]\s*(#.*)?$"#).unwrap());
static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"?([A-Za-z0-9_\-]+)"?\s*=\s*"([^"]*)"\s*(#.*)?$"#).unwrap()
});

/// A program declared under `[programs.<cluster>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub cluster: String,
    pub name: String,
    pub id: String,
}

/// What the manifest declares. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub programs: Vec<ProgramEntry>,
    pub anchor_version: Option<String>,
}

impl ProjectConfig {
    /// Programs declared for one cluster
    pub fn programs_for(&self, cluster: &str) -> Vec<&ProgramEntry> {
        self.programs.iter().filter(|p| p.cluster == cluster).collect()
    }
}

/// Key of the `[programs.<cluster>]` section Anchor uses for `network`
pub fn manifest_cluster(network: Network) -> &'static str {
    match network {
        Network::Devnet => "devnet",
        Network::Testnet => "testnet",
        Network::MainnetBeta => "mainnet",
    }
}

/// Check the workspace has the Anchor project shape and read its manifest
pub async fn validate(workspace: &Dir, network: Network) -> Result<ProjectConfig, DeployError> {
    info!("Validating project in {}", workspace.path().display());

    let manifest = workspace.file(MANIFEST_FILE);
    if !manifest.exists().await {
        return Err(DeployError::invalid_project(format!(
            "{} not found: repository is not an Anchor project",
            MANIFEST_FILE
        )));
    }

    if !workspace.subdir(PROGRAMS_DIR).exists().await {
        return Err(DeployError::invalid_project(format!(
            "{}/ directory not found: repository is not an Anchor project",
            PROGRAMS_DIR
        )));
    }

    let contents = manifest.read_string().await.map_err(|e| {
        DeployError::invalid_project(format!("Failed to read {}: {}", MANIFEST_FILE, e.message()))
    })?;
    let config = parse_manifest(&contents);

    debug!(
        "Manifest declares {} program entries (anchor {:?})",
        config.programs.len(),
        config.anchor_version
    );
    if config.programs_for(manifest_cluster(network)).is_empty() {
        warn!(
            "{} declares no programs for {}; deploying anyway",
            MANIFEST_FILE, network
        );
    }

    Ok(config)
}

/// Pull program entries and the toolchain version out of `Anchor.toml`.
///
/// Deliberately line-based and forgiving: anything it does not recognize is
/// skipped rather than rejected.
pub fn parse_manifest(contents: &str) -> ProjectConfig {
    enum Section {
        Programs(String),
        Toolchain,
        Other,
    }

    let mut config = ProjectConfig::default();
    let mut section = Section::Other;

    for line in contents.lines() {
        if let Some(caps) = SECTION_RE.captures(line) {
            let name = caps[1].replace('"', "");
            section = match name.split_once('.') {
                Some(("programs", cluster)) if !cluster.is_empty() => {
                    Section::Programs(cluster.to_string())
                }
                None if name == "toolchain" => Section::Toolchain,
                _ => Section::Other,
            };
            continue;
        }

        let Some(caps) = ENTRY_RE.captures(line) else {
            continue;
        };
        match &section {
            Section::Programs(cluster) => config.programs.push(ProgramEntry {
                cluster: cluster.clone(),
                name: caps[1].to_string(),
                id: caps[2].to_string(),
            }),
            Section::Toolchain if &caps[1] == "anchor_version" => {
                config.anchor_version = Some(caps[2].to_string());
            }
            _ => {}
        }
    }

    config
}
