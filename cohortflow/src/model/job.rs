//! Job records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CohortId, JobId};
use crate::config::StageConfig;
use crate::core::{JobStatus, StageId};
use crate::utils::{generate_id, now_utc, Timestamp};

/// Domain counters reported by a processing engine. Opaque to the core.
pub type JobMetrics = HashMap<String, serde_json::Value>;

/// A tracked unit of background work bound to one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id.
    pub id: JobId,
    /// Owning cohort.
    pub cohort_id: CohortId,
    /// Bound stage.
    pub stage_id: StageId,
    /// Current status.
    pub status: JobStatus,
    /// Progress, 0 to 100.
    pub progress: u8,
    /// When the job was created.
    pub submitted_at: Timestamp,
    /// When the job started running.
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal status.
    pub finished_at: Option<Timestamp>,
    /// Configuration the job was started with.
    pub config: StageConfig,
    /// Engine-reported metrics.
    pub metrics: Option<JobMetrics>,
    /// Last error or cancellation message.
    pub error: Option<String>,
    /// The job this one replaced through a retry.
    pub retry_of: Option<JobId>,
}

impl Job {
    /// Creates a queued job.
    #[must_use]
    pub fn new(cohort_id: CohortId, stage_id: StageId, config: StageConfig) -> Self {
        Self {
            id: generate_id(),
            cohort_id,
            stage_id,
            status: JobStatus::Queued,
            progress: 0,
            submitted_at: now_utc(),
            started_at: None,
            finished_at: None,
            config,
            metrics: None,
            error: None,
            retry_of: None,
        }
    }

    /// Marks the job as a retry of another job.
    #[must_use]
    pub fn with_retry_of(mut self, previous: JobId) -> Self {
        self.retry_of = Some(previous);
        self
    }

    /// Returns true if the job reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed run time in milliseconds, up to now for live jobs.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(now_utc);
        Some((end - started).num_milliseconds())
    }
}
