//! Dependency resolution between consecutive stages.
//!
//! A stage that is not completed is `blocked` exactly when some earlier stage
//! has not completed. The first stage of a cohort is never blocked, and a
//! completed stage keeps its status when an upstream stage is re-run.

use serde::{Deserialize, Serialize};

use crate::core::{StageId, StageStatus};
use crate::model::{Cohort, Stage};

/// A status rewrite performed by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    /// The rewritten stage.
    pub stage: StageId,
    /// Status before the rewrite.
    pub from: StageStatus,
    /// Status after the rewrite.
    pub to: StageStatus,
}

/// Rewrites stage statuses in place and reports what changed.
///
/// Completed stages are never re-blocked, even when an upstream stage is
/// no longer complete.
pub fn resolve_stages(stages: &mut [Stage]) -> Vec<StageChange> {
    let mut changes = Vec::new();
    let mut predecessor_completed = true;

    for stage in stages.iter_mut() {
        let from = stage.status;

        if !predecessor_completed && stage.status != StageStatus::Completed {
            stage.status = StageStatus::Blocked;
            stage.progress = 0;
        } else if predecessor_completed && stage.status == StageStatus::Blocked {
            stage.status = StageStatus::Pending;
            stage.progress = 0;
        }

        if stage.status != from {
            changes.push(StageChange {
                stage: stage.id,
                from,
                to: stage.status,
            });
        }

        predecessor_completed = predecessor_completed && stage.status == StageStatus::Completed;
    }

    changes
}

/// Returns a copy of the cohort with corrected stage statuses.
#[must_use]
pub fn resolve(cohort: &Cohort) -> Cohort {
    let mut resolved = cohort.clone();
    resolve_stages(&mut resolved.stages);
    resolved
}

/// Returns true if every stage before `id` is completed.
#[must_use]
pub fn predecessors_completed(stages: &[Stage], id: StageId) -> bool {
    stages
        .iter()
        .take_while(|stage| stage.id != id)
        .all(|stage| stage.status == StageStatus::Completed)
}

/// Checks the resolver's rule on every stage that is not completed: it is
/// blocked exactly when some earlier stage is not completed.
#[must_use]
pub fn dependencies_hold(stages: &[Stage]) -> bool {
    let mut upstream_completed = true;
    stages.iter().all(|stage| {
        let completed = stage.status == StageStatus::Completed;
        let holds = completed || (stage.status == StageStatus::Blocked) != upstream_completed;
        upstream_completed = upstream_completed && completed;
        holds
    })
}
