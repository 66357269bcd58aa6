//! Build lifecycle types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a single build
///
/// Transitions only move forward: `Waiting -> Running -> {Success | Failed}`.
/// `Waiting -> Failed` is also allowed for jobs rejected before they start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    #[default]
    Waiting,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid build state transition: {from} -> {to}")]
pub struct StateError {
    pub from: BuildState,
    pub to: BuildState,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Success | BuildState::Failed)
    }

    pub fn can_transition_to(self, next: BuildState) -> bool {
        matches!(
            (self, next),
            (BuildState::Waiting, BuildState::Running)
                | (BuildState::Waiting, BuildState::Failed)
                | (BuildState::Running, BuildState::Success)
                | (BuildState::Running, BuildState::Failed)
        )
    }

    /// Returns the next state, or an error for a backward or sideways move
    pub fn transition(self, next: BuildState) -> Result<BuildState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Waiting => "waiting",
            BuildState::Running => "running",
            BuildState::Success => "success",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub job_id: u64,
    pub state: BuildState,
    pub trace: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.state == BuildState::Success
    }
}
