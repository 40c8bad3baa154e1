//! Stages and their run history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobId;
use crate::config::StageConfig;
use crate::core::{catalog, StageId, StageStatus};
use crate::utils::{generate_id, Timestamp};

/// Record of one execution attempt of a stage.
///
/// A run is open while its job is live and is sealed exactly once when the
/// job terminates; after that it is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    /// Run id.
    pub id: Uuid,
    /// The job that executed this run.
    pub job_id: JobId,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished, if it has.
    pub finished_at: Option<Timestamp>,
    /// `running` while open, then `completed` or `failed`.
    pub status: StageStatus,
    /// Configuration the run was started with.
    pub config: StageConfig,
    /// Progress at the time the run was sealed.
    pub progress: u8,
    /// Error message for failed runs.
    pub error: Option<String>,
}

impl StageRun {
    /// Returns true while the run has not been sealed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// One pipeline stage as applied to a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage id.
    pub id: StageId,
    /// Human-readable label from the catalog.
    pub label: String,
    /// Current status.
    pub status: StageStatus,
    /// Progress, 0 to 100.
    pub progress: u8,
    /// When the stage was last started.
    pub last_run_at: Option<Timestamp>,
    /// The live job bound to this stage.
    pub job_id: Option<JobId>,
    /// The most recent job ever bound to this stage.
    pub last_job_id: Option<JobId>,
    /// Stored configuration used for the next run.
    pub config: StageConfig,
    /// Execution history, oldest first.
    #[serde(default)]
    pub runs: Vec<StageRun>,
}

impl Stage {
    pub(crate) fn new(id: StageId, status: StageStatus, config: StageConfig) -> Self {
        Self {
            id,
            label: catalog::definition(id).label.to_string(),
            status,
            progress: 0,
            last_run_at: None,
            job_id: None,
            last_job_id: None,
            config,
            runs: Vec::new(),
        }
    }

    /// Returns the open run, if any.
    #[must_use]
    pub fn open_run(&self) -> Option<&StageRun> {
        self.runs.last().filter(|run| run.is_open())
    }

    /// Returns the most recent run.
    #[must_use]
    pub fn last_run(&self) -> Option<&StageRun> {
        self.runs.last()
    }

    /// Returns true if the stage's progress agrees with its status.
    #[must_use]
    pub fn progress_is_consistent(&self) -> bool {
        let completed = self.status == StageStatus::Completed;
        if completed != (self.progress == 100) {
            return false;
        }
        !(self.status.requires_zero_progress() && self.progress != 0)
    }

    pub(crate) fn begin_run(&mut self, job_id: JobId, now: Timestamp) {
        self.job_id = Some(job_id);
        self.last_job_id = Some(job_id);
        self.last_run_at = Some(now);
        self.runs.push(StageRun {
            id: generate_id(),
            job_id,
            started_at: now,
            finished_at: None,
            status: StageStatus::Running,
            config: self.config.clone(),
            progress: self.progress,
            error: None,
        });
    }

    /// Seals the open run and clears the job binding.
    pub(crate) fn finish_run(&mut self, status: StageStatus, error: Option<String>, now: Timestamp) {
        let progress = self.progress;
        if let Some(run) = self.runs.last_mut().filter(|run| run.is_open()) {
            run.finished_at = Some(now);
            run.status = status;
            run.progress = progress;
            run.error = error;
        }
        self.job_id = None;
    }
}
