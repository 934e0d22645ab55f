//! Admission-gated deployment service

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::executor::DeploymentPipeline;
use crate::deploy::fsm::PipelineState;
use crate::deploy::process::CommandRunner;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentResult, DeploymentSpec};
use crate::services::tracker::{DeploymentStatus, DeploymentTracker};
use crate::storage::settings::Settings;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Front door for deployments.
///
/// At most `max_concurrent_deployments` runs hold a permit at once; further
/// requests wait in `Pending` until one is released.
pub struct DeploymentService {
    pipeline: DeploymentPipeline,
    gate: Semaphore,
    max_concurrent: usize,
    tracker: DeploymentTracker,
}

impl DeploymentService {
    pub fn new(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Self {
        let max_concurrent = settings.limits.max_concurrent_deployments.max(1);
        Self {
            pipeline: DeploymentPipeline::new(settings, runner),
            gate: Semaphore::new(max_concurrent),
            max_concurrent,
            tracker: DeploymentTracker::new(settings.limits.status_retention),
        }
    }

    pub fn pipeline(&self) -> &DeploymentPipeline {
        &self.pipeline
    }

    /// Run a deployment to completion.
    ///
    /// The run is spawned on its own task, so it still finishes and cleans up
    /// if the caller stops waiting.
    pub async fn deploy(
        self: &Arc<Self>,
        spec: DeploymentSpec,
    ) -> Result<DeploymentResult, DeployError> {
        self.tracker.register(&spec.id);

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = service.run_admitted(&spec).await;
            service
                .tracker
                .finish(&spec.id, outcome.as_ref().err().map(DeployError::kind));
            outcome
        });

        handle
            .await
            .map_err(|e| DeployError::system(format!("Deployment task failed: {}", e)))?
    }

    async fn run_admitted(&self, spec: &DeploymentSpec) -> Result<DeploymentResult, DeployError> {
        if self.gate.available_permits() == 0 {
            info!("Deployment {} waiting for a free slot", spec.id);
        }
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DeployError::system(format!("Admission gate closed: {}", e)))?;
        debug!(
            "Deployment {} admitted ({}/{} slots in use)",
            spec.id,
            self.active_deployments(),
            self.max_concurrent
        );

        let observer = |state: PipelineState| self.tracker.set_state(&spec.id, state);
        self.pipeline.run(spec, &observer).await
    }

    pub fn status(&self, deployment_id: &str) -> Option<DeploymentStatus> {
        self.tracker.get(deployment_id)
    }

    /// Runs currently holding a slot
    pub fn active_deployments(&self) -> usize {
        self.max_concurrent - self.gate.available_permits()
    }

    /// Runs admitted or waiting for a slot
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Wait up to `grace` for in-flight runs to finish, then cancel the rest
    /// and wait for their teardown.
    pub async fn drain(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        if self.in_flight() > 0 {
            warn!(
                "Cancelling {} deployments still running after {:?}",
                self.in_flight(),
                grace
            );
            self.pipeline.cancel_all();
            while self.in_flight() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }
        info!("All deployments drained");
    }
}
