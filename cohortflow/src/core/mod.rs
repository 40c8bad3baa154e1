//! Core domain vocabulary for cohortflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage, job, and cohort status enums
//! - The static stage catalog
//! - Lifecycle events

pub mod catalog;
mod event;
mod status;

pub use catalog::{StageDefinition, STAGE_CATALOG};
pub use event::LifecycleEvent;
pub use status::{CohortStatus, JobAction, JobStatus, StageId, StageStatus};
