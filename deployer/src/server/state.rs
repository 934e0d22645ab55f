//! Server state

use std::sync::Arc;
use std::time::Instant;

use crate::services::deployment::DeploymentService;

/// Server state shared across handlers
pub struct ServerState {
    pub service: Arc<DeploymentService>,
    /// Mask unclassified error details in responses
    pub production: bool,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(service: Arc<DeploymentService>, production: bool) -> Self {
        Self {
            service,
            production,
            started_at: Instant::now(),
        }
    }
}
