//! Orchestration phase tracking.
//!
//! **Phases**:
//! - `Idle` until `run` starts
//! - `CheckingDependencies` while the import scan and package probes run
//! - `InstallingDependencies` while the chosen packages are installed
//! - `Building` while the backend process is alive
//! - `Done`, `Cancelled` or `Failed` once the outcome is known
//!
//! The coordinator is the only writer; workers never touch this state.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Discrete states of one build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildPhaseState {
    Idle,
    CheckingDependencies,
    InstallingDependencies,
    Building,
    Done,
    Cancelled,
    Failed,
}

impl BuildPhaseState {
    /// Get the human-readable name for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhaseState::Idle => "idle",
            BuildPhaseState::CheckingDependencies => "checking dependencies",
            BuildPhaseState::InstallingDependencies => "installing dependencies",
            BuildPhaseState::Building => "building",
            BuildPhaseState::Done => "done",
            BuildPhaseState::Cancelled => "cancelled",
            BuildPhaseState::Failed => "failed",
        }
    }

    /// Get all valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<BuildPhaseState> {
        match self {
            BuildPhaseState::Idle => vec![
                BuildPhaseState::CheckingDependencies,
                BuildPhaseState::Building,
                BuildPhaseState::Cancelled,
                BuildPhaseState::Failed,
            ],
            BuildPhaseState::CheckingDependencies => vec![
                BuildPhaseState::InstallingDependencies,
                BuildPhaseState::Building,
                BuildPhaseState::Cancelled,
                BuildPhaseState::Failed,
            ],
            BuildPhaseState::InstallingDependencies => vec![
                BuildPhaseState::Building,
                BuildPhaseState::Cancelled,
                BuildPhaseState::Failed,
            ],
            BuildPhaseState::Building => vec![
                BuildPhaseState::Done,
                BuildPhaseState::Cancelled,
                BuildPhaseState::Failed,
            ],
            BuildPhaseState::Done | BuildPhaseState::Cancelled | BuildPhaseState::Failed => vec![],
        }
    }

    /// Check if a transition to the given phase is valid.
    pub fn can_transition_to(&self, next: BuildPhaseState) -> bool {
        self.valid_next_phases().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildPhaseState::Done | BuildPhaseState::Cancelled | BuildPhaseState::Failed
        )
    }
}

impl std::fmt::Display for BuildPhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of one build request, reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded { artifact: std::path::PathBuf },
    Cancelled,
    Failed(String),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded { .. })
    }

    /// Terminal phase this outcome maps to.
    pub fn phase(&self) -> BuildPhaseState {
        match self {
            BuildOutcome::Succeeded { .. } => BuildPhaseState::Done,
            BuildOutcome::Cancelled => BuildPhaseState::Cancelled,
            BuildOutcome::Failed(_) => BuildPhaseState::Failed,
        }
    }
}

/// Snapshot of one build request's progress.
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    /// Current phase
    pub phase: BuildPhaseState,

    /// Packages the user chose not to install (or that failed to install)
    pub skipped_packages: Vec<String>,

    /// Build start timestamp
    pub start_time: SystemTime,

    /// Last phase update timestamp
    pub last_update_time: SystemTime,

    /// Error message if the request failed
    pub error: Option<String>,

    /// Set once the final outcome has been published
    pub outcome_reported: bool,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestrationState {
    pub fn new() -> Self {
        let now = SystemTime::now();
        OrchestrationState {
            phase: BuildPhaseState::Idle,
            skipped_packages: Vec::new(),
            start_time: now,
            last_update_time: now,
            error: None,
            outcome_reported: false,
        }
    }

    /// Attempt to transition to the next phase.
    pub fn transition_to(&mut self, next_phase: BuildPhaseState) -> Result<(), String> {
        if !self.phase.can_transition_to(next_phase) {
            return Err(format!(
                "Invalid phase transition: {} -> {}",
                self.phase.as_str(),
                next_phase.as_str()
            ));
        }
        self.phase = next_phase;
        self.last_update_time = SystemTime::now();
        Ok(())
    }

    /// Record an error and mark the request as failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        self.phase = BuildPhaseState::Failed;
        self.last_update_time = SystemTime::now();
    }

    /// Time elapsed since the request started (zero if the clock went backwards).
    pub fn elapsed_since_start(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }
}

/// `1m 05s` style duration text for log lines.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{}s", secs, elapsed.subsec_millis() / 100)
    }
}
