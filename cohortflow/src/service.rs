//! Transport-independent facade over the registry and the job manager.
//!
//! [`PipelineService`] exposes the operations a client surface needs:
//! cohort registration and queries, running a stage, and job actions. It
//! also accepts processing engine signals.

use std::sync::Arc;
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::core::{JobAction, StageId};
use crate::errors::Result;
use crate::events::EventSink;
use crate::jobs::{EngineSignal, JobLifecycleManager, ProcessingEngine};
use crate::model::{Cohort, CohortId, Job, JobId, Stage};
use crate::registry::{CohortRegistry, CohortSpec};

/// Entry point for clients of the state machine.
#[derive(Debug, Clone)]
pub struct PipelineService {
    manager: Arc<JobLifecycleManager>,
}

impl PipelineService {
    /// Creates a service with a fresh registry, the no-op engine and no-op sink.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let manager = JobLifecycleManager::builder(Arc::new(CohortRegistry::new()))
            .config(config)
            .build()?;
        Ok(Self { manager })
    }

    /// Creates a service with an engine and an event sink.
    pub fn with_components(
        config: OrchestratorConfig,
        engine: Arc<dyn ProcessingEngine>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let manager = JobLifecycleManager::builder(Arc::new(CohortRegistry::new()))
            .config(config)
            .engine(engine)
            .event_sink(sink)
            .build()?;
        Ok(Self { manager })
    }

    /// Wraps an existing manager.
    #[must_use]
    pub fn from_manager(manager: Arc<JobLifecycleManager>) -> Self {
        Self { manager }
    }

    /// Returns the underlying job manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<JobLifecycleManager> {
        &self.manager
    }

    fn registry(&self) -> &CohortRegistry {
        self.manager.registry()
    }

    /// Registers a cohort.
    pub fn register_cohort(&self, spec: CohortSpec) -> Result<Cohort> {
        self.registry().register(spec)
    }

    /// Lists all cohorts, oldest first.
    #[must_use]
    pub fn list_cohorts(&self) -> Vec<Cohort> {
        self.registry().list()
    }

    /// Returns one cohort.
    pub fn get_cohort(&self, id: CohortId) -> Result<Cohort> {
        self.registry().get(id)
    }

    /// Removes a cohort that holds no live jobs, along with its job history.
    pub fn remove_cohort(&self, id: CohortId) -> Result<Cohort> {
        self.manager.remove_cohort(id)
    }

    /// Starts a stage with an optional configuration patch.
    pub fn run_stage(
        &self,
        cohort_id: CohortId,
        stage_id: StageId,
        config: Option<&serde_json::Value>,
    ) -> Result<Stage> {
        self.manager.start_stage(cohort_id, stage_id, config)
    }

    /// Applies a pause, resume, cancel or retry action.
    pub fn job_action(&self, job_id: JobId, action: JobAction) -> Result<Job> {
        info!(job_id = %job_id, action = %action, "Job action requested");
        self.manager.job_action(job_id, action)
    }

    /// Returns one job, live or terminal.
    pub fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.manager.get_job(job_id)
    }

    /// Lists jobs, optionally for one cohort only.
    #[must_use]
    pub fn list_jobs(&self, cohort_id: Option<CohortId>) -> Vec<Job> {
        match cohort_id {
            Some(cohort_id) => self.manager.jobs_for_cohort(cohort_id),
            None => self.manager.list_jobs(),
        }
    }

    /// Applies a processing engine signal.
    pub fn ingest(&self, signal: EngineSignal) -> Result<Job> {
        self.manager.ingest(signal)
    }
}
