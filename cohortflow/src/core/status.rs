//! Status and identifier enums for stages, jobs, and cohorts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a pipeline stage.
///
/// Variants are declared in pipeline order, so the derived `Ord` is the
/// catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// De-identification of the raw dataset.
    Deidentify,
    /// Metadata extraction.
    Extract,
    /// Classification and sorting.
    Sort,
    /// Structured-output conversion.
    Convert,
}

impl StageId {
    /// All stage ids in pipeline order.
    pub const ALL: [Self; 4] = [Self::Deidentify, Self::Extract, Self::Sort, Self::Convert];

    /// Returns the wire name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deidentify => "deidentify",
            Self::Extract => "extract",
            Self::Sort => "sort",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// The status of a stage within a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Startable, no job yet.
    Idle,
    /// Startable, waiting for a run request.
    Pending,
    /// A job is advancing this stage.
    Running,
    /// The last run finished successfully.
    Completed,
    /// The last run failed or was canceled.
    Failed,
    /// The bound job is paused.
    Paused,
    /// The predecessor stage has not completed.
    Blocked,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl StageStatus {
    /// Returns true if a live job is bound to a stage in this status.
    #[must_use]
    pub fn has_live_job(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns true if the stage's last run reached an end state.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if progress must be zero in this status.
    #[must_use]
    pub fn requires_zero_progress(&self) -> bool {
        matches!(self, Self::Idle | Self::Blocked)
    }
}

/// The status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet advancing.
    Queued,
    /// Advancing.
    Running,
    /// Advancement suspended.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a cancel request.
    Canceled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true if the transition `self -> next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use JobStatus::{Canceled, Completed, Failed, Paused, Queued, Running};
        match (*self, next) {
            (Queued, Running | Canceled | Failed) => true,
            (Running, Paused | Completed | Failed | Canceled) => true,
            (Paused, Running | Canceled | Failed) => true,
            _ => false,
        }
    }
}

/// The derived status of a whole cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortStatus {
    /// Nothing is running and not everything is complete.
    Pending,
    /// At least one stage is running.
    Running,
    /// Every stage is complete.
    Completed,
    /// At least one stage failed.
    Failed,
}

impl Default for CohortStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for CohortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A control action a client can apply to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Suspend progress.
    Pause,
    /// Continue a paused job.
    Resume,
    /// Stop the job; the stage is marked failed.
    Cancel,
    /// Start a fresh job for a failed stage.
    Retry,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Cancel => write!(f, "cancel"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

impl FromStr for JobAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "cancel" => Ok(Self::Cancel),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown job action: {other}")),
        }
    }
}
