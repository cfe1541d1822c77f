//! Install State Machine
//!
//! `StageTracker` is the single record of how far a run got. Transitions are
//! validated: a run moves forward one stage at a time, or drops to `Aborted`
//! from any non-terminal stage. Nothing ever moves backwards, which matches
//! the pipeline itself: completed work is never undone.
//!
//! # Stage Flow
//!
//! ```text
//! Init
//!     ↓
//! Confirmed
//!     ↓
//! RequirementsChecked
//!     ↓
//! DependenciesReady → OsUpdated → CredentialsReady → PackagesInstalled
//!     ↓
//! AppInstalled → SupervisorReady → CronReady → WebserverReady
//!     ↓
//! Done
//!
//! (Any non-terminal stage can transition to Aborted)
//! ```

use std::fmt;
use thiserror::Error;

use crate::types::StepName;

/// Run stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    Init = 0,
    /// Operator agreed to proceed
    Confirmed = 1,
    /// Requirement gate evaluated
    RequirementsChecked = 2,
    DependenciesReady = 3,
    OsUpdated = 4,
    /// Verified credentials are held by the run
    CredentialsReady = 5,
    PackagesInstalled = 6,
    AppInstalled = 7,
    SupervisorReady = 8,
    CronReady = 9,
    WebserverReady = 10,
    /// Run completed (terminal state)
    Done = 11,
    /// Run stopped early (terminal state)
    Aborted = 255,
}

impl InstallStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true for Done and Aborted
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::RequirementsChecked),
            Self::RequirementsChecked => Some(Self::DependenciesReady),
            Self::DependenciesReady => Some(Self::OsUpdated),
            Self::OsUpdated => Some(Self::CredentialsReady),
            Self::CredentialsReady => Some(Self::PackagesInstalled),
            Self::PackagesInstalled => Some(Self::AppInstalled),
            Self::AppInstalled => Some(Self::SupervisorReady),
            Self::SupervisorReady => Some(Self::CronReady),
            Self::CronReady => Some(Self::WebserverReady),
            Self::WebserverReady => Some(Self::Done),
            Self::Done | Self::Aborted => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Init => "Not started",
            Self::Confirmed => "Confirmed",
            Self::RequirementsChecked => "Requirements checked",
            Self::DependenciesReady => "Dependencies ready",
            Self::OsUpdated => "OS updated",
            Self::CredentialsReady => "Database credentials ready",
            Self::PackagesInstalled => "Packages installed",
            Self::AppInstalled => "Application installed",
            Self::SupervisorReady => "Queue workers ready",
            Self::CronReady => "Scheduler ready",
            Self::WebserverReady => "Web server ready",
            Self::Done => "Installation complete",
            Self::Aborted => "Installation aborted",
        }
    }

    /// Stage reached when `step` completes
    pub const fn after_step(step: StepName) -> Self {
        match step {
            StepName::InstallDependencies => Self::DependenciesReady,
            StepName::UpdateOs => Self::OsUpdated,
            StepName::NegotiateCredentials => Self::CredentialsReady,
            StepName::InstallPackages => Self::PackagesInstalled,
            StepName::InstallApplication => Self::AppInstalled,
            StepName::SetupSupervisor => Self::SupervisorReady,
            StepName::SetupScheduler => Self::CronReady,
            StepName::ProvisionWebServer => Self::WebserverReady,
        }
    }

    /// Returns all stages in order (excluding Aborted)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::Init,
            Self::Confirmed,
            Self::RequirementsChecked,
            Self::DependenciesReady,
            Self::OsUpdated,
            Self::CredentialsReady,
            Self::PackagesInstalled,
            Self::AppInstalled,
            Self::SupervisorReady,
            Self::CronReady,
            Self::WebserverReady,
            Self::Done,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: InstallStage, to: InstallStage },

    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition { from: InstallStage, to: InstallStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: InstallStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

/// Tracks the current stage of one run, with a timestamped history.
///
/// ```
/// use prodstack::install_state::{InstallStage, StageTracker};
///
/// let mut tracker = StageTracker::new();
/// tracker.advance().unwrap();
/// assert_eq!(tracker.current_stage(), InstallStage::Confirmed);
///
/// // Cannot skip stages
/// assert!(tracker.transition_to(InstallStage::OsUpdated).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: InstallStage,
    aborted_at: Option<InstallStage>,
    /// (stage, unix timestamp) for every stage entered
    stage_history: Vec<(InstallStage, u64)>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: InstallStage::Init,
            aborted_at: None,
            stage_history: Vec::with_capacity(InstallStage::all_stages().len()),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    /// Stage the run was in when it aborted
    #[inline]
    pub fn aborted_at(&self) -> Option<InstallStage> {
        self.aborted_at
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.current == InstallStage::Done
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// Advance to the next stage in sequence
    pub fn advance(&mut self) -> Result<InstallStage, InstallTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(InstallTransitionError::FromTerminalState { from: self.current })?;
        self.enter(next);
        Ok(next)
    }

    /// Transition to `target`, which must be the immediate next stage
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }
        // Aborted has its own entry point
        if target == InstallStage::Aborted {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.enter(target);
        Ok(target)
    }

    /// Abort from any non-terminal stage
    pub fn abort(&mut self) -> Result<(), InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        self.aborted_at = Some(self.current);
        self.enter(InstallStage::Aborted);
        Ok(())
    }

    fn enter(&mut self, stage: InstallStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        log::debug!("Stage: {} -> {}", self.current, stage);
        self.stage_history.push((stage, timestamp));
        self.current = stage;
    }
}

impl From<InstallTransitionError> for crate::error::ProvisionError {
    fn from(err: InstallTransitionError) -> Self {
        crate::error::ProvisionError::InstallTransition(err.to_string())
    }
}
