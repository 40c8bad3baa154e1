//! # Cohortflow
//!
//! A stage-dependency and job-lifecycle state machine for cohort processing
//! pipelines.
//!
//! A cohort moves through a fixed, strictly ordered set of stages
//! (de-identification, metadata extraction, classification, format
//! conversion). Cohortflow tracks:
//!
//! - **Stage dependencies**: a stage is blocked until its predecessor completes
//! - **Job lifecycles**: start, pause, resume, cancel and retry of the
//!   background work bound to a stage
//! - **Cohort status**: an overall status and completion percentage derived
//!   from the stages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cohortflow::prelude::*;
//!
//! let service = PipelineService::new(OrchestratorConfig::default())?;
//! let cohort = service.register_cohort(CohortSpec::new("brain-mri"))?;
//!
//! let stage = service.run_stage(cohort.id, StageId::Deidentify, None)?;
//! let job_id = stage.job_id.expect("running stage has a job");
//!
//! service.job_action(job_id, JobAction::Pause)?;
//! service.job_action(job_id, JobAction::Resume)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod model;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{aggregate, CohortSummary};
    pub use crate::config::{
        ConvertConfig, DeidentifyConfig, ExtractConfig, OrchestratorConfig, ProgressMode,
        SortConfig, StageConfig,
    };
    pub use crate::core::{
        CohortStatus, JobAction, JobStatus, LifecycleEvent, StageId, StageStatus,
    };
    pub use crate::errors::{CohortflowError, EntityKind, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::jobs::{EngineSignal, JobLifecycleManager, NoOpEngine, ProcessingEngine};
    pub use crate::model::{Cohort, CohortId, Job, JobId, JobMetrics, Stage, StageRun};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::registry::{CohortRegistry, CohortSpec};
    pub use crate::resolver::resolve;
    pub use crate::service::PipelineService;
    pub use crate::utils::{generate_id, iso_timestamp, Timestamp};
}
