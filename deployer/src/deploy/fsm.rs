//! Finite State Machine for a deployment run

use serde::{Deserialize, Serialize};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Accepted, nothing started
    Pending,

    /// Cloning the repository
    Cloning,

    /// Checking the project layout
    Validating,

    /// Resolving and probing the cluster
    ConfiguringCluster,

    /// Issuing the keypair
    SettingUpWallet,

    /// Checking balance, airdropping on test networks
    Funding,

    /// Running the build
    Building,

    /// Running the deploy
    Deploying,

    /// Checking the program on-chain
    Verifying,

    /// Finished successfully
    Done,

    /// Finished with an error
    Failed,
}

impl PipelineState {
    /// The state that follows on success, `None` for terminal states
    pub fn next(self) -> Option<PipelineState> {
        use PipelineState::*;
        match self {
            Pending => Some(Cloning),
            Cloning => Some(Validating),
            Validating => Some(ConfiguringCluster),
            ConfiguringCluster => Some(SettingUpWallet),
            SettingUpWallet => Some(Funding),
            Funding => Some(Building),
            Building => Some(Deploying),
            Deploying => Some(Verifying),
            Verifying => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        use PipelineState::*;
        match self {
            Pending => "pending",
            Cloning => "cloning",
            Validating => "validating",
            ConfiguringCluster => "configuring_cluster",
            SettingUpWallet => "setting_up_wallet",
            Funding => "funding",
            Building => "building",
            Deploying => "deploying",
            Verifying => "verifying",
            Done => "done",
            Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Move on to the given step
    Advance(PipelineState),

    /// The current step failed
    Fail(String),
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    error: Option<String>,
    failed_at: Option<PipelineState>,
}

impl PipelineFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            error: None,
            failed_at: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The step that was running when the run failed
    pub fn failed_at(&self) -> Option<PipelineState> {
        self.failed_at
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (current, PipelineEvent::Advance(target)) if current.next() == Some(*target) => {
                *target
            }
            (current, PipelineEvent::Fail(err)) if !current.is_terminal() => {
                self.error = Some(err.clone());
                self.failed_at = Some(current);
                PipelineState::Failed
            }
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
