//! Cohorts and the post-mutation reconciliation hook.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CohortId, JobId, Stage};
use crate::aggregator::{self, CohortSummary};
use crate::config::StageConfig;
use crate::core::{catalog, CohortStatus, StageId, StageStatus};
use crate::resolver::{self, StageChange};
use crate::utils::{generate_id, now_utc, Timestamp};

/// A logical dataset tracked through the pipeline.
///
/// `status` and `percentage` are derived from the stages and only change
/// through [`Cohort::reconcile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    /// Cohort id.
    pub id: CohortId,
    /// Display name.
    pub name: String,
    /// Whether the de-identification stage is part of this cohort.
    pub deidentify_enabled: bool,
    /// Stages in catalog order.
    pub stages: Vec<Stage>,
    /// Derived overall status.
    pub status: CohortStatus,
    /// Derived completion percentage.
    pub percentage: u8,
    /// When the cohort was registered.
    pub created_at: Timestamp,
    /// When any stage last changed.
    pub updated_at: Timestamp,
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Stage statuses rewritten by the resolver.
    pub stage_changes: Vec<StageChange>,
    /// Cohort status before the pass.
    pub previous_status: CohortStatus,
    /// Cohort summary after the pass.
    pub summary: CohortSummary,
}

impl Reconciliation {
    /// Returns true if the cohort status changed.
    #[must_use]
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.summary.status
    }
}

impl Cohort {
    /// Builds a cohort with its stage set fixed by the catalog.
    ///
    /// The first stage starts `pending` and the rest `blocked`. Stages without
    /// an entry in `configs` get the documented defaults.
    pub(crate) fn new(
        name: impl Into<String>,
        deidentify_enabled: bool,
        mut configs: HashMap<StageId, StageConfig>,
    ) -> Self {
        let stages: Vec<Stage> = catalog::stages_for(deidentify_enabled)
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                let status = if index == 0 {
                    StageStatus::Pending
                } else {
                    StageStatus::Blocked
                };
                let config = configs
                    .remove(&id)
                    .unwrap_or_else(|| StageConfig::default_for(id));
                Stage::new(id, status, config)
            })
            .collect();

        let now = now_utc();
        Self {
            id: generate_id(),
            name: name.into(),
            deidentify_enabled,
            stages,
            status: CohortStatus::Pending,
            percentage: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a stage by id.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == id)
    }

    pub(crate) fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.id == id)
    }

    /// Returns the stage ids in pipeline order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id).collect()
    }

    /// Returns every live job bound to a stage of this cohort.
    #[must_use]
    pub fn live_jobs(&self) -> Vec<(StageId, JobId)> {
        self.stages
            .iter()
            .filter_map(|stage| stage.job_id.map(|job_id| (stage.id, job_id)))
            .collect()
    }

    /// Returns true if any stage after `id` holds a live job.
    #[must_use]
    pub fn has_live_job_after(&self, id: StageId) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.id > id && stage.job_id.is_some())
    }

    /// Re-resolves stage dependencies, then re-aggregates the cohort status.
    ///
    /// Every operation that changes a stage's status must call this before
    /// committing.
    pub fn reconcile(&mut self) -> Reconciliation {
        let previous_status = self.status;
        let stage_changes = resolver::resolve_stages(&mut self.stages);
        let summary = aggregator::aggregate(&self.stages, self.percentage);

        self.status = summary.status;
        self.percentage = summary.percentage;
        self.updated_at = now_utc();

        Reconciliation {
            stage_changes,
            previous_status,
            summary,
        }
    }
}
