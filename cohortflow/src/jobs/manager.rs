//! The job lifecycle manager.
//!
//! Every operation resolves the owning cohort, mutates a draft under the
//! cohort lock, reconciles dependencies and status, and commits. Job records
//! are committed inside the same closure as the last fallible step, so a
//! rejected operation leaves both the cohort and the job untouched. Events
//! are emitted and the engine is notified only after the commit, outside the
//! lock.

use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{EngineSignal, NoOpEngine, ProcessingEngine};
use super::ticker::{TickControl, TickerTable};
use crate::config::{OrchestratorConfig, ProgressMode, StageConfig};
use crate::core::{JobAction, JobStatus, LifecycleEvent, StageId, StageStatus};
use crate::errors::{CohortflowError, EntityKind, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::model::{Cohort, CohortId, Job, JobId, JobMetrics, Reconciliation, Stage};
use crate::registry::CohortRegistry;
use crate::resolver;
use crate::utils::now_utc;

/// Message recorded on jobs stopped by a cancel request.
pub const CANCELED_BY_USER: &str = "Canceled by user";

/// Builder for a [`JobLifecycleManager`].
pub struct JobLifecycleManagerBuilder {
    registry: Arc<CohortRegistry>,
    config: OrchestratorConfig,
    engine: Arc<dyn ProcessingEngine>,
    sink: Arc<dyn EventSink>,
}

impl JobLifecycleManagerBuilder {
    /// Sets the runtime configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the processing engine notified of control decisions.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn ProcessingEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validates the configuration and builds the manager.
    pub fn build(self) -> Result<Arc<JobLifecycleManager>> {
        self.config.validate()?;
        Ok(Arc::new_cyclic(|self_ref| JobLifecycleManager {
            registry: self.registry,
            jobs: DashMap::new(),
            tickers: TickerTable::new(),
            engine: self.engine,
            sink: self.sink,
            config: self.config,
            self_ref: self_ref.clone(),
        }))
    }
}

/// Owns jobs and drives the per-job state machine.
pub struct JobLifecycleManager {
    registry: Arc<CohortRegistry>,
    jobs: DashMap<JobId, Job>,
    tickers: TickerTable,
    engine: Arc<dyn ProcessingEngine>,
    sink: Arc<dyn EventSink>,
    config: OrchestratorConfig,
    self_ref: Weak<Self>,
}

/// Result of a progress update inside the cohort lock.
enum Advance {
    Ignored(Job),
    Progressed(Job, Reconciliation),
    Completed(Job, Reconciliation),
}

impl JobLifecycleManager {
    /// Starts building a manager over a registry.
    #[must_use]
    pub fn builder(registry: Arc<CohortRegistry>) -> JobLifecycleManagerBuilder {
        JobLifecycleManagerBuilder {
            registry,
            config: OrchestratorConfig::default(),
            engine: Arc::new(NoOpEngine),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Returns the registry this manager mutates.
    #[must_use]
    pub fn registry(&self) -> &Arc<CohortRegistry> {
        &self.registry
    }

    /// Returns the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    /// Starts a stage and returns it.
    ///
    /// `patch` is merged into the stage's stored configuration before the
    /// run. Starting a stage that is already running returns it unchanged.
    pub fn start_stage(
        &self,
        cohort_id: CohortId,
        stage_id: StageId,
        patch: Option<&serde_json::Value>,
    ) -> Result<Stage> {
        let started = self.registry.update(cohort_id, |cohort| {
            let stage = cohort
                .stage(stage_id)
                .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))?;

            match stage.status {
                StageStatus::Running => return Ok(None),
                StageStatus::Paused => {
                    return Err(CohortflowError::conflict(format!(
                        "stage {stage_id} of cohort {cohort_id} is paused; resume its job instead"
                    )));
                }
                StageStatus::Blocked => {
                    return Err(CohortflowError::invalid_transition(
                        EntityKind::Stage,
                        stage_id,
                        stage.status,
                        "start",
                    ));
                }
                _ => {}
            }
            if !resolver::predecessors_completed(&cohort.stages, stage_id) {
                return Err(CohortflowError::invalid_transition(
                    EntityKind::Stage,
                    stage_id,
                    stage.status,
                    "start",
                ));
            }
            if cohort.has_live_job_after(stage_id) {
                return Err(CohortflowError::conflict(format!(
                    "a later stage of cohort {cohort_id} holds a live job"
                )));
            }

            let config = match patch {
                Some(patch) => stage.config.merge_patch(patch)?,
                None => stage.config.clone(),
            };
            self.launch(cohort, stage_id, config, None).map(Some)
        })?;

        match started {
            Some((job, stage, reconciliation)) => {
                info!(
                    cohort_id = %cohort_id,
                    stage = %stage_id,
                    job_id = %job.id,
                    progress = job.progress,
                    "Stage started"
                );
                self.after_launch(&job, &reconciliation);
                Ok(stage)
            }
            None => {
                info!(cohort_id = %cohort_id, stage = %stage_id, "Stage already running");
                let cohort = self.registry.get(cohort_id)?;
                cohort
                    .stage(stage_id)
                    .cloned()
                    .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))
            }
        }
    }

    /// Advances a running job by one simulated step.
    ///
    /// Reaching 100 finalizes the job as completed. A tick on a paused job
    /// returns it unchanged.
    pub fn tick(&self, job_id: JobId) -> Result<Job> {
        let step = self.next_step();
        self.advance(job_id, "tick", true, |current| current.saturating_add(step))
    }

    /// Pauses a running job. Pausing a paused job is a no-op.
    pub fn pause(&self, job_id: JobId) -> Result<Job> {
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let (job, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let mut job = self.get_job(job_id)?;
            if job.status == JobStatus::Paused {
                return Ok((job, None));
            }
            if !job.status.can_transition_to(JobStatus::Paused) {
                return Err(Self::rejected(job_id, job.status, "pause"));
            }

            let stage = Self::bound_stage_mut(cohort, &job)?;
            stage.status = StageStatus::Paused;
            job.status = JobStatus::Paused;
            let reconciliation = cohort.reconcile();

            self.jobs.insert(job_id, job.clone());
            self.tickers.stop(job_id, "paused");
            Ok((job, Some(reconciliation)))
        })?;

        if let Some(reconciliation) = reconciliation {
            info!(job_id = %job_id, stage = %job.stage_id, progress = job.progress, "Job paused");
            self.sink.try_emit(LifecycleEvent::job_paused(&job));
            self.emit_reconciliation(cohort_id, &reconciliation);
            self.engine.pause(job_id);
        }
        Ok(job)
    }

    /// Resumes a paused job from its current progress. Resuming a running
    /// job is a no-op.
    pub fn resume(&self, job_id: JobId) -> Result<Job> {
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let (job, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let mut job = self.get_job(job_id)?;
            match job.status {
                JobStatus::Running => return Ok((job, None)),
                JobStatus::Paused => {}
                other => return Err(Self::rejected(job_id, other, "resume")),
            }

            let stage = Self::bound_stage_mut(cohort, &job)?;
            stage.status = StageStatus::Running;
            job.status = JobStatus::Running;
            let reconciliation = cohort.reconcile();

            self.jobs.insert(job_id, job.clone());
            self.spawn_ticker(job_id);
            Ok((job, Some(reconciliation)))
        })?;

        if let Some(reconciliation) = reconciliation {
            info!(job_id = %job_id, stage = %job.stage_id, progress = job.progress, "Job resumed");
            self.sink.try_emit(LifecycleEvent::job_resumed(&job));
            self.emit_reconciliation(cohort_id, &reconciliation);
            self.engine.resume(job_id);
        }
        Ok(job)
    }

    /// Cancels a live job. The bound stage is marked failed.
    pub fn cancel(&self, job_id: JobId) -> Result<Job> {
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let (job, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let job = self.get_job(job_id)?;
            if !job.status.can_transition_to(JobStatus::Canceled) {
                return Err(Self::rejected(job_id, job.status, "cancel"));
            }
            self.finalize(
                cohort,
                job,
                JobStatus::Canceled,
                Some(CANCELED_BY_USER.to_string()),
                None,
            )
        })?;

        info!(job_id = %job_id, stage = %job.stage_id, progress = job.progress, "Job canceled");
        self.sink.try_emit(LifecycleEvent::job_canceled(&job));
        self.emit_reconciliation(cohort_id, &reconciliation);
        self.engine.cancel(job_id);
        Ok(job)
    }

    /// Retries the failed stage a job was bound to.
    ///
    /// The stage is reset to pending with zero progress and started again
    /// with its last-used configuration under a new job id.
    pub fn retry(&self, job_id: JobId) -> Result<Job> {
        let previous = self.get_job(job_id)?;
        let cohort_id = previous.cohort_id;
        let stage_id = previous.stage_id;

        let (job, _stage, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let stage = cohort
                .stage(stage_id)
                .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))?;
            if stage.status != StageStatus::Failed {
                return Err(CohortflowError::invalid_transition(
                    EntityKind::Stage,
                    stage_id,
                    stage.status,
                    "retry",
                ));
            }
            if stage.last_job_id != Some(job_id) {
                return Err(CohortflowError::conflict(format!(
                    "job {job_id} was superseded by a newer run of stage {stage_id}"
                )));
            }
            if cohort.has_live_job_after(stage_id) {
                return Err(CohortflowError::conflict(format!(
                    "a later stage of cohort {cohort_id} holds a live job"
                )));
            }

            let stage = cohort
                .stage_mut(stage_id)
                .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))?;
            stage.progress = 0;
            stage.status = StageStatus::Pending;
            stage.job_id = None;
            let config = stage.config.clone();

            self.launch(cohort, stage_id, config, Some(job_id))
        })?;

        info!(
            cohort_id = %cohort_id,
            stage = %stage_id,
            job_id = %job.id,
            retry_of = %job_id,
            "Stage retried"
        );
        self.after_launch(&job, &reconciliation);
        Ok(job)
    }

    /// Dispatches a client job action.
    pub fn job_action(&self, job_id: JobId, action: JobAction) -> Result<Job> {
        match action {
            JobAction::Pause => self.pause(job_id),
            JobAction::Resume => self.resume(job_id),
            JobAction::Cancel => self.cancel(job_id),
            JobAction::Retry => self.retry(job_id),
        }
    }

    // ------------------------------------------------------------------
    // Engine signals
    // ------------------------------------------------------------------

    /// Records engine-reported progress.
    ///
    /// Progress never regresses and is held below 100 until the engine
    /// reports completion.
    pub fn on_progress(&self, job_id: JobId, progress: u8) -> Result<Job> {
        self.advance(job_id, "progress", false, |_| progress.min(99))
    }

    /// Finalizes a running job as completed with optional metrics.
    pub fn on_completed(&self, job_id: JobId, metrics: Option<JobMetrics>) -> Result<Job> {
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let (job, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let job = self.get_job(job_id)?;
            if !job.status.can_transition_to(JobStatus::Completed) {
                return Err(Self::rejected(job_id, job.status, "complete"));
            }
            self.finalize(cohort, job, JobStatus::Completed, None, metrics)
        })?;

        info!(job_id = %job_id, stage = %job.stage_id, "Job completed");
        self.sink.try_emit(LifecycleEvent::job_completed(&job));
        self.emit_reconciliation(cohort_id, &reconciliation);
        Ok(job)
    }

    /// Finalizes a live job as failed, keeping the reason on the job.
    pub fn on_failed(&self, job_id: JobId, reason: impl Into<String>) -> Result<Job> {
        let reason = reason.into();
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let (job, reconciliation) = self.registry.update(cohort_id, |cohort| {
            let job = self.get_job(job_id)?;
            if !job.status.can_transition_to(JobStatus::Failed) {
                return Err(Self::rejected(job_id, job.status, "fail"));
            }
            self.finalize(cohort, job, JobStatus::Failed, Some(reason), None)
        })?;

        warn!(job_id = %job_id, stage = %job.stage_id, error = ?job.error, "Job failed");
        self.sink.try_emit(LifecycleEvent::job_failed(&job));
        self.emit_reconciliation(cohort_id, &reconciliation);
        Ok(job)
    }

    /// Applies one engine signal.
    pub fn ingest(&self, signal: EngineSignal) -> Result<Job> {
        match signal {
            EngineSignal::Progress { job_id, progress } => self.on_progress(job_id, progress),
            EngineSignal::Completed { job_id, metrics } => self.on_completed(job_id, metrics),
            EngineSignal::Failed { job_id, reason } => self.on_failed(job_id, reason),
        }
    }

    /// Spawns a task that ingests signals until the channel closes.
    ///
    /// Rejected signals are logged and skipped.
    pub fn spawn_signal_listener(
        self: &Arc<Self>,
        mut signals: mpsc::Receiver<EngineSignal>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let job_id = signal.job_id();
                if let Err(err) = manager.ingest(signal) {
                    warn!(job_id = %job_id, error = %err, "Engine signal rejected");
                }
            }
            debug!("Engine signal channel closed");
        })
    }

    /// Removes a cohort and forgets the jobs it held.
    ///
    /// Refused with a conflict while the cohort has a live job.
    pub fn remove_cohort(&self, cohort_id: CohortId) -> Result<Cohort> {
        let cohort = self.registry.remove(cohort_id)?;
        let mut dropped = 0usize;
        self.jobs.retain(|job_id, job| {
            if job.cohort_id != cohort_id {
                return true;
            }
            self.tickers.stop(*job_id, "cohort removed");
            dropped += 1;
            false
        });
        info!(cohort_id = %cohort_id, jobs = dropped, "Cohort removed with its jobs");
        Ok(cohort)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns a job by id, including terminal jobs.
    pub fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CohortflowError::job_not_found(job_id))
    }

    /// Returns every job, oldest first.
    #[must_use]
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Returns the jobs of one cohort, oldest first.
    #[must_use]
    pub fn jobs_for_cohort(&self, cohort_id: CohortId) -> Vec<Job> {
        let mut jobs = self.list_jobs();
        jobs.retain(|job| job.cohort_id == cohort_id);
        jobs
    }

    /// Returns the number of running tick drivers.
    #[must_use]
    pub fn active_tickers(&self) -> usize {
        self.tickers.len()
    }

    /// Stops every tick driver. Job and cohort state is left as is.
    pub fn shutdown(&self) {
        self.tickers.stop_all("shutdown");
        info!("Job lifecycle manager stopped");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn rejected(job_id: JobId, status: JobStatus, action: &str) -> CohortflowError {
        warn!(job_id = %job_id, status = %status, action, "Job action rejected");
        CohortflowError::invalid_transition(EntityKind::Job, job_id, status, action)
    }

    fn bound_stage_mut<'a>(cohort: &'a mut Cohort, job: &Job) -> Result<&'a mut Stage> {
        let cohort_id = cohort.id;
        let stage = cohort
            .stage_mut(job.stage_id)
            .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, job.stage_id))?;
        if stage.job_id != Some(job.id) {
            return Err(CohortflowError::conflict(format!(
                "job {} is not bound to stage {}",
                job.id, job.stage_id
            )));
        }
        Ok(stage)
    }

    fn next_step(&self) -> u8 {
        let (min, max) = (self.config.tick_step_min, self.config.tick_step_max);
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Creates a running job for a stage on the draft and commits the job.
    fn launch(
        &self,
        cohort: &mut Cohort,
        stage_id: StageId,
        config: StageConfig,
        retry_of: Option<JobId>,
    ) -> Result<(Job, Stage, Reconciliation)> {
        let cohort_id = cohort.id;
        let now = now_utc();
        let floor = self.config.start_progress_floor;

        let mut job = Job::new(cohort_id, stage_id, config.clone());
        if let Some(previous) = retry_of {
            job = job.with_retry_of(previous);
        }

        let stage = cohort
            .stage_mut(stage_id)
            .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))?;
        if stage.status.is_settled() {
            stage.progress = 0;
        }
        stage.config = config;
        stage.status = StageStatus::Running;
        stage.progress = stage.progress.max(floor);
        stage.begin_run(job.id, now);

        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.progress = stage.progress;

        let reconciliation = cohort.reconcile();
        let stage = cohort
            .stage(stage_id)
            .cloned()
            .ok_or_else(|| CohortflowError::stage_not_found(cohort_id, stage_id))?;

        self.jobs.insert(job.id, job.clone());
        self.spawn_ticker(job.id);
        Ok((job, stage, reconciliation))
    }

    fn after_launch(&self, job: &Job, reconciliation: &Reconciliation) {
        self.sink.try_emit(LifecycleEvent::job_started(job));
        self.emit_reconciliation(job.cohort_id, reconciliation);
        self.engine.start(job);
    }

    /// Moves a running job's progress forward, finalizing at 100 when allowed.
    fn advance<F>(&self, job_id: JobId, action: &str, complete_at_full: bool, target: F) -> Result<Job>
    where
        F: FnOnce(u8) -> u8,
    {
        let cohort_id = self.get_job(job_id)?.cohort_id;
        let outcome = self.registry.update(cohort_id, |cohort| {
            let mut job = self.get_job(job_id)?;
            match job.status {
                JobStatus::Running => {}
                JobStatus::Queued | JobStatus::Paused => return Ok(Advance::Ignored(job)),
                other => return Err(Self::rejected(job_id, other, action)),
            }

            let next = target(job.progress).min(100).max(job.progress);
            if next == job.progress {
                return Ok(Advance::Ignored(job));
            }
            if next == 100 && complete_at_full {
                job.progress = 100;
                let (job, reconciliation) =
                    self.finalize(cohort, job, JobStatus::Completed, None, None)?;
                return Ok(Advance::Completed(job, reconciliation));
            }

            let stage = Self::bound_stage_mut(cohort, &job)?;
            stage.progress = next;
            job.progress = next;
            let reconciliation = cohort.reconcile();

            self.jobs.insert(job_id, job.clone());
            Ok(Advance::Progressed(job, reconciliation))
        })?;

        match outcome {
            Advance::Ignored(job) => {
                debug!(job_id = %job_id, status = %job.status, action, "Progress update ignored");
                Ok(job)
            }
            Advance::Progressed(job, reconciliation) => {
                debug!(job_id = %job_id, progress = job.progress, action, "Job progressed");
                self.sink.try_emit(LifecycleEvent::job_progress(&job));
                self.emit_reconciliation(cohort_id, &reconciliation);
                Ok(job)
            }
            Advance::Completed(job, reconciliation) => {
                info!(job_id = %job_id, stage = %job.stage_id, "Job completed");
                self.sink.try_emit(LifecycleEvent::job_completed(&job));
                self.emit_reconciliation(cohort_id, &reconciliation);
                Ok(job)
            }
        }
    }

    /// Moves a job to a terminal status, seals its stage run, and reconciles.
    fn finalize(
        &self,
        cohort: &mut Cohort,
        mut job: Job,
        terminal: JobStatus,
        error: Option<String>,
        metrics: Option<JobMetrics>,
    ) -> Result<(Job, Reconciliation)> {
        let now = now_utc();
        let stage = Self::bound_stage_mut(cohort, &job)?;

        let stage_status = if terminal == JobStatus::Completed {
            stage.progress = 100;
            job.progress = 100;
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        stage.status = stage_status;
        stage.finish_run(stage_status, error.clone(), now);

        job.status = terminal;
        job.finished_at = Some(now);
        job.error = error;
        if metrics.is_some() {
            job.metrics = metrics;
        }

        let reconciliation = cohort.reconcile();
        self.jobs.insert(job.id, job.clone());
        self.tickers.stop(job.id, terminal.to_string().as_str());
        Ok((job, reconciliation))
    }

    fn emit_reconciliation(&self, cohort_id: CohortId, reconciliation: &Reconciliation) {
        for change in &reconciliation.stage_changes {
            info!(
                cohort_id = %cohort_id,
                stage = %change.stage,
                from = %change.from,
                to = %change.to,
                "Stage dependency status changed"
            );
            self.sink.try_emit(LifecycleEvent::stage_status_changed(
                cohort_id,
                change.stage,
                change.from,
                change.to,
            ));
        }
        if reconciliation.status_changed() {
            info!(
                cohort_id = %cohort_id,
                from = %reconciliation.previous_status,
                to = %reconciliation.summary.status,
                percentage = reconciliation.summary.percentage,
                "Cohort status changed"
            );
            self.sink.try_emit(LifecycleEvent::cohort_status_changed(
                cohort_id,
                reconciliation.previous_status,
                reconciliation.summary.status,
                reconciliation.summary.percentage,
            ));
        }
    }

    fn spawn_ticker(&self, job_id: JobId) {
        if self.config.progress_mode != ProgressMode::Simulated {
            return;
        }
        let manager = self.self_ref.clone();
        self.tickers.start(job_id, self.config.tick_interval(), move || {
            let Some(manager) = manager.upgrade() else {
                return TickControl::Stop;
            };
            match manager.tick(job_id) {
                Ok(job) if job.status == JobStatus::Running => TickControl::Continue,
                Ok(_) => TickControl::Stop,
                Err(err) => {
                    debug!(job_id = %job_id, error = %err, "Tick driver stopping");
                    TickControl::Stop
                }
            }
        });
    }
}

impl Drop for JobLifecycleManager {
    fn drop(&mut self) {
        self.tickers.stop_all("dropped");
    }
}

impl std::fmt::Debug for JobLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLifecycleManager")
            .field("jobs", &self.jobs.len())
            .field("tickers", &self.tickers)
            .field("config", &self.config)
            .finish()
    }
}
