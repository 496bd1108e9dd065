//! Run phase tracking with transition validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{RunPhase, RunStatus};

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: RunPhase,
    pub entered_at: DateTime<Utc>,
}

/// Tracks a run's phase and status, rejecting out-of-order transitions.
///
/// Bootstrapping -> Planning -> Executing -> Rendering -> Complete
///
/// Rendering is optional, so Executing may go straight to Complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTracker {
    phase: RunPhase,
    status: RunStatus,
    phase_history: Vec<PhaseHistoryEntry>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Bootstrapping,
            status: RunStatus::Pending,
            phase_history: vec![PhaseHistoryEntry {
                phase: RunPhase::Bootstrapping,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn can_transition(&self, target: RunPhase) -> bool {
        self.status != RunStatus::Failed
            && matches!(
                (self.phase, target),
                (RunPhase::Bootstrapping, RunPhase::Planning)
                    | (RunPhase::Planning, RunPhase::Executing)
                    | (RunPhase::Executing, RunPhase::Rendering)
                    | (RunPhase::Executing, RunPhase::Complete)
                    | (RunPhase::Rendering, RunPhase::Complete)
            )
    }

    pub fn transition(&mut self, target: RunPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.status = if target == RunPhase::Complete {
            RunStatus::Completed
        } else {
            RunStatus::Running
        };
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Mark the run as started without leaving the current phase.
    pub fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
        }
    }

    /// Mark the run failed in its current phase. Further transitions are
    /// rejected.
    pub fn fail(&mut self) {
        self.status = RunStatus::Failed;
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }
}
