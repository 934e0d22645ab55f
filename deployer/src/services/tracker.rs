//! In-memory status of in-flight and recent deployments

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::deploy::fsm::PipelineState;
use crate::errors::ErrorKind;

/// Status of one deployment as reported by `GET /deploy/status/{id}`
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub deployment_id: String,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, DeploymentStatus>,
    /// Finished ids, oldest first
    finished: VecDeque<String>,
}

/// Tracks every run until it finishes, then keeps the last `retention`
/// finished runs. Nothing is persisted.
pub struct DeploymentTracker {
    entries: Mutex<Entries>,
    retention: usize,
}

impl DeploymentTracker {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            retention,
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entries)
    }

    pub fn register(&self, deployment_id: &str) {
        self.with_entries(|entries| {
            entries.by_id.insert(
                deployment_id.to_string(),
                DeploymentStatus {
                    deployment_id: deployment_id.to_string(),
                    state: PipelineState::Pending,
                    started_at: Utc::now(),
                    finished_at: None,
                    error_code: None,
                },
            );
        });
    }

    pub fn set_state(&self, deployment_id: &str, state: PipelineState) {
        self.with_entries(|entries| {
            if let Some(status) = entries.by_id.get_mut(deployment_id) {
                status.state = state;
            }
        });
    }

    /// Record the outcome and evict the oldest finished entries past retention
    pub fn finish(&self, deployment_id: &str, error: Option<ErrorKind>) {
        let retention = self.retention;
        self.with_entries(|entries| {
            let Some(status) = entries.by_id.get_mut(deployment_id) else {
                return;
            };
            if status.finished_at.is_some() {
                return;
            }
            status.state = match error {
                Some(_) => PipelineState::Failed,
                None => PipelineState::Done,
            };
            status.finished_at = Some(Utc::now());
            status.error_code = error.map(|kind| kind.code().to_string());
            entries.finished.push_back(deployment_id.to_string());

            while entries.finished.len() > retention {
                if let Some(oldest) = entries.finished.pop_front() {
                    entries.by_id.remove(&oldest);
                }
            }
        });
    }

    pub fn get(&self, deployment_id: &str) -> Option<DeploymentStatus> {
        self.with_entries(|entries| entries.by_id.get(deployment_id).cloned())
    }

    /// Runs registered and not yet finished
    pub fn in_flight(&self) -> usize {
        self.with_entries(|entries| entries.by_id.len() - entries.finished.len())
    }
}
