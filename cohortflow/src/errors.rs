//! Error types for the cohortflow state machine.
//!
//! Every fallible operation in the crate returns [`CohortflowError`]. The
//! variants mirror the three error kinds a transport needs to distinguish
//! (`not_found`, `invalid_transition`, `conflict`) plus configuration and
//! infrastructure failures.

use std::collections::HashMap;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CohortflowError>;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A cohort.
    Cohort,
    /// A stage inside a cohort.
    Stage,
    /// A job.
    Job,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cohort => write!(f, "cohort"),
            Self::Stage => write!(f, "stage"),
            Self::Job => write!(f, "job"),
        }
    }
}

/// The main error type for cohortflow operations.
#[derive(Debug, Error)]
pub enum CohortflowError {
    /// An unknown cohort, stage, or job id.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The kind of entity.
        kind: EntityKind,
        /// The id that was looked up.
        id: String,
    },

    /// The action is not valid from the entity's current status.
    #[error("Invalid transition for {entity} {id}: cannot {action} from '{from}'")]
    InvalidTransition {
        /// The kind of entity.
        entity: EntityKind,
        /// The entity id.
        id: String,
        /// The status the entity was in.
        from: String,
        /// The rejected action.
        action: String,
    },

    /// The request conflicts with the current state and has no idempotent reading.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A stage configuration payload was rejected.
    #[error("Invalid configuration for stage '{stage}': {reason}")]
    InvalidConfig {
        /// The stage the payload was meant for.
        stage: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CohortflowError {
    /// Creates a not-found error for a cohort.
    #[must_use]
    pub fn cohort_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: EntityKind::Cohort,
            id: id.to_string(),
        }
    }

    /// Creates a not-found error for a stage.
    #[must_use]
    pub fn stage_not_found(cohort_id: impl std::fmt::Display, stage: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: EntityKind::Stage,
            id: format!("{cohort_id}/{stage}"),
        }
    }

    /// Creates a not-found error for a job.
    #[must_use]
    pub fn job_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: EntityKind::Job,
            id: id.to_string(),
        }
    }

    /// Creates an invalid-transition error.
    #[must_use]
    pub fn invalid_transition(
        entity: EntityKind,
        id: impl ToString,
        from: impl ToString,
        action: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates an invalid-config error.
    #[must_use]
    pub fn invalid_config(stage: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns a stable machine-readable code for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns true for errors caused by the caller rather than the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InvalidTransition { .. }
                | Self::Conflict(_)
                | Self::InvalidRequest(_)
                | Self::InvalidConfig { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));

        match self {
            Self::NotFound { kind, id } => {
                map.insert("entity".to_string(), serde_json::json!(kind.to_string()));
                map.insert("id".to_string(), serde_json::json!(id));
            }
            Self::InvalidTransition { entity, id, from, action } => {
                map.insert("entity".to_string(), serde_json::json!(entity.to_string()));
                map.insert("id".to_string(), serde_json::json!(id));
                map.insert("from".to_string(), serde_json::json!(from));
                map.insert("action".to_string(), serde_json::json!(action));
            }
            Self::InvalidConfig { stage, reason } => {
                map.insert("stage".to_string(), serde_json::json!(stage));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            _ => {}
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for CohortflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
