//! Data model: cohorts own stages, stages reference jobs by id.

mod cohort;
mod job;
mod stage;

pub use cohort::{Cohort, Reconciliation};
pub use job::{Job, JobMetrics};
pub use stage::{Stage, StageRun};

/// Identifier of a cohort.
pub type CohortId = uuid::Uuid;

/// Identifier of a job.
pub type JobId = uuid::Uuid;
