//! The processing engine port and the signals engines report back.

use serde::{Deserialize, Serialize};

use crate::model::{Job, JobId, JobMetrics};

/// An external worker that performs the domain work for a stage.
///
/// The lifecycle manager notifies the engine of control decisions after
/// they are committed. Calls must not block and must not call back into the
/// manager synchronously; engines report progress through [`EngineSignal`]s.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessingEngine: Send + Sync {
    /// A job was started; `job.config` holds the stage configuration.
    fn start(&self, job: &Job);

    /// A running job was paused.
    fn pause(&self, _job_id: JobId) {}

    /// A paused job was resumed.
    fn resume(&self, _job_id: JobId) {}

    /// A job was canceled.
    fn cancel(&self, _job_id: JobId) {}
}

/// Engine that ignores all notifications.
///
/// Used with simulated progress, where the tick driver stands in for real work.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEngine;

impl ProcessingEngine for NoOpEngine {
    fn start(&self, _job: &Job) {}
}

/// A report from a processing engine about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum EngineSignal {
    /// The job advanced.
    Progress {
        /// Job id.
        job_id: JobId,
        /// Absolute progress, 0 to 100.
        progress: u8,
    },
    /// The job finished successfully.
    Completed {
        /// Job id.
        job_id: JobId,
        /// Domain counters, if any.
        #[serde(default)]
        metrics: Option<JobMetrics>,
    },
    /// The job failed.
    Failed {
        /// Job id.
        job_id: JobId,
        /// Failure description.
        reason: String,
    },
}

impl EngineSignal {
    /// Returns the job the signal is about.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }
}
