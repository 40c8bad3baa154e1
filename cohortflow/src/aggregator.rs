//! Derives a cohort's overall status and completion percentage.

use serde::{Deserialize, Serialize};

use crate::core::{CohortStatus, StageStatus};
use crate::model::Stage;

/// The derived summary of a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSummary {
    /// Overall status.
    pub status: CohortStatus,
    /// Completion percentage, 0 to 100.
    pub percentage: u8,
}

/// Aggregates stage statuses into a cohort summary.
///
/// Rules apply in order: all completed, then any failed, then any running,
/// then pending. A failed cohort keeps `previous_percentage` so that failure
/// does not erase progress already reported.
#[must_use]
pub fn aggregate(stages: &[Stage], previous_percentage: u8) -> CohortSummary {
    if !stages.is_empty() && stages.iter().all(|s| s.status == StageStatus::Completed) {
        return CohortSummary {
            status: CohortStatus::Completed,
            percentage: 100,
        };
    }

    if stages.iter().any(|s| s.status == StageStatus::Failed) {
        return CohortSummary {
            status: CohortStatus::Failed,
            percentage: previous_percentage,
        };
    }

    let status = if stages.iter().any(|s| s.status == StageStatus::Running) {
        CohortStatus::Running
    } else {
        CohortStatus::Pending
    };

    CohortSummary {
        status,
        percentage: mean_progress(stages),
    }
}

/// Unweighted mean of stage progress, rounded to the nearest integer.
#[must_use]
pub fn mean_progress(stages: &[Stage]) -> u8 {
    if stages.is_empty() {
        return 0;
    }
    let total: u32 = stages.iter().map(|s| u32::from(s.progress)).sum();
    let count = u32::try_from(stages.len()).unwrap_or(u32::MAX);
    // Round half up; the result is at most 100.
    u8::try_from((total * 2 + count) / (count * 2)).unwrap_or(100)
}
