//! Lifecycle event records emitted on every state transition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CohortStatus, StageId, StageStatus};
use crate::model::{CohortId, Job};

/// An event emitted by the lifecycle manager.
///
/// Events are delivered to an [`EventSink`](crate::events::EventSink) for
/// logging, auditing, or pushing updates to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The event type (e.g., "job.started", "stage.unblocked").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl LifecycleEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload as a JSON object.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        serde_json::Value::Object(map)
    }

    fn for_job(event_type: &str, job: &Job) -> Self {
        Self::new(event_type)
            .add_data("job_id", serde_json::json!(job.id.to_string()))
            .add_data("cohort_id", serde_json::json!(job.cohort_id.to_string()))
            .add_data("stage", serde_json::json!(job.stage_id))
            .add_data("status", serde_json::json!(job.status))
            .add_data("progress", serde_json::json!(job.progress))
    }

    /// Creates a "job.started" event.
    #[must_use]
    pub fn job_started(job: &Job) -> Self {
        let event = Self::for_job("job.started", job);
        match job.retry_of {
            Some(previous) => event.add_data("retry_of", serde_json::json!(previous.to_string())),
            None => event,
        }
    }

    /// Creates a "job.progress" event.
    #[must_use]
    pub fn job_progress(job: &Job) -> Self {
        Self::for_job("job.progress", job)
    }

    /// Creates a "job.paused" event.
    #[must_use]
    pub fn job_paused(job: &Job) -> Self {
        Self::for_job("job.paused", job)
    }

    /// Creates a "job.resumed" event.
    #[must_use]
    pub fn job_resumed(job: &Job) -> Self {
        Self::for_job("job.resumed", job)
    }

    /// Creates a "job.completed" event.
    #[must_use]
    pub fn job_completed(job: &Job) -> Self {
        let event = Self::for_job("job.completed", job);
        match &job.metrics {
            Some(metrics) => event.add_data("metrics", serde_json::json!(metrics)),
            None => event,
        }
    }

    /// Creates a "job.failed" event.
    #[must_use]
    pub fn job_failed(job: &Job) -> Self {
        Self::for_job("job.failed", job)
            .add_data("error", serde_json::json!(job.error))
    }

    /// Creates a "job.canceled" event.
    #[must_use]
    pub fn job_canceled(job: &Job) -> Self {
        Self::for_job("job.canceled", job)
            .add_data("error", serde_json::json!(job.error))
    }

    /// Creates a "stage.unblocked" or "stage.blocked" event for a resolver change.
    #[must_use]
    pub fn stage_status_changed(
        cohort_id: CohortId,
        stage: StageId,
        from: StageStatus,
        to: StageStatus,
    ) -> Self {
        let event_type = if to == StageStatus::Blocked {
            "stage.blocked"
        } else {
            "stage.unblocked"
        };
        Self::new(event_type)
            .add_data("cohort_id", serde_json::json!(cohort_id.to_string()))
            .add_data("stage", serde_json::json!(stage))
            .add_data("from", serde_json::json!(from))
            .add_data("to", serde_json::json!(to))
    }

    /// Creates a "cohort.status_changed" event.
    #[must_use]
    pub fn cohort_status_changed(
        cohort_id: CohortId,
        from: CohortStatus,
        to: CohortStatus,
        percentage: u8,
    ) -> Self {
        Self::new("cohort.status_changed")
            .add_data("cohort_id", serde_json::json!(cohort_id.to_string()))
            .add_data("from", serde_json::json!(from))
            .add_data("to", serde_json::json!(to))
            .add_data("percentage", serde_json::json!(percentage))
    }
}
