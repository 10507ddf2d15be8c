//! Finite State Machine for pipeline execution

use serde::{Deserialize, Serialize};

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Nothing has run yet
    Init,

    /// A stage is executing
    Running(String),

    /// The named stage finished successfully
    Completed(String),

    /// The named stage failed; terminal
    Failed(String),

    /// Every stage completed; terminal
    Succeeded,
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Begin the named stage
    Start(String),

    /// The running stage returned Ok
    StageSucceeded,

    /// The running stage returned an error or panicked
    StageFailed(String),

    /// No stages remain
    Finish,
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    error: Option<String>,
}

impl PipelineFsm {
    /// Create a new FSM in init state
    pub fn new() -> Self {
        Self {
            state: PipelineState::Init,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PipelineState::Failed(_) | PipelineState::Succeeded)
    }

    /// Name of the last stage that finished, successfully or not
    pub fn last_completed_stage(&self) -> Option<&str> {
        match &self.state {
            PipelineState::Completed(stage) | PipelineState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Init
            (PipelineState::Init, PipelineEvent::Start(stage)) => {
                PipelineState::Running(stage.clone())
            }
            (PipelineState::Init, PipelineEvent::Finish) => PipelineState::Succeeded,

            // From Running
            (PipelineState::Running(stage), PipelineEvent::StageSucceeded) => {
                PipelineState::Completed(stage.clone())
            }
            (PipelineState::Running(stage), PipelineEvent::StageFailed(err)) => {
                self.error = Some(err.clone());
                PipelineState::Failed(stage.clone())
            }

            // From Completed
            (PipelineState::Completed(_), PipelineEvent::Start(stage)) => {
                PipelineState::Running(stage.clone())
            }
            (PipelineState::Completed(_), PipelineEvent::Finish) => PipelineState::Succeeded,

            // Invalid transitions
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
