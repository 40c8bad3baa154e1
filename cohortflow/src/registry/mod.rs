//! The cohort/stage registry.
//!
//! The registry is the single owner of cohort state. Each cohort sits behind
//! its own mutex, so mutations to one cohort are linearized while different
//! cohorts proceed in parallel. Mutations go through [`CohortRegistry::update`],
//! which applies a closure to a draft copy and commits it only if the
//! closure succeeds.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::StageConfig;
use crate::core::StageId;
use crate::errors::{CohortflowError, Result};
use crate::model::{Cohort, CohortId};

/// Registration request for a new cohort.
#[derive(Debug, Clone, Default)]
pub struct CohortSpec {
    /// Display name.
    pub name: String,
    /// Include the de-identification stage.
    pub deidentify_enabled: bool,
    /// Per-stage configuration overrides.
    pub configs: HashMap<StageId, StageConfig>,
}

impl CohortSpec {
    /// Creates a registration request with de-identification enabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deidentify_enabled: true,
            configs: HashMap::new(),
        }
    }

    /// Enables or disables the de-identification stage.
    #[must_use]
    pub fn with_deidentify(mut self, enabled: bool) -> Self {
        self.deidentify_enabled = enabled;
        self
    }

    /// Overrides the configuration of the stage the payload belongs to.
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.configs.insert(config.stage_id(), config);
        self
    }
}

/// Thread-safe store of cohorts with per-cohort locking.
///
/// Outside the crate the registry is read-only. Cohorts change through the
/// [`JobLifecycleManager`](crate::jobs::JobLifecycleManager):
///
/// ```compile_fail
/// use cohortflow::registry::{CohortRegistry, CohortSpec};
///
/// let registry = CohortRegistry::new();
/// let cohort = registry.register(CohortSpec::new("study")).unwrap();
/// registry.update(cohort.id, |draft| {
///     draft.percentage = 100;
///     Ok(())
/// });
/// ```
#[derive(Default)]
pub struct CohortRegistry {
    cohorts: DashMap<CohortId, Arc<Mutex<Cohort>>>,
}

impl CohortRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cohort and returns it.
    pub fn register(&self, spec: CohortSpec) -> Result<Cohort> {
        if spec.name.trim().is_empty() {
            return Err(CohortflowError::InvalidRequest(
                "cohort name must not be empty".to_string(),
            ));
        }
        if !spec.deidentify_enabled && spec.configs.contains_key(&StageId::Deidentify) {
            return Err(CohortflowError::invalid_config(
                StageId::Deidentify,
                "de-identification is disabled for this cohort",
            ));
        }
        for config in spec.configs.values() {
            config.validate()?;
        }

        let cohort = Cohort::new(spec.name, spec.deidentify_enabled, spec.configs);
        info!(
            cohort_id = %cohort.id,
            name = %cohort.name,
            stages = ?cohort.stage_ids(),
            "Registered cohort"
        );

        self.cohorts
            .insert(cohort.id, Arc::new(Mutex::new(cohort.clone())));
        Ok(cohort)
    }

    fn handle(&self, id: CohortId) -> Result<Arc<Mutex<Cohort>>> {
        self.cohorts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CohortflowError::cohort_not_found(id))
    }

    /// Returns a snapshot of a cohort.
    pub fn get(&self, id: CohortId) -> Result<Cohort> {
        Ok(self.handle(id)?.lock().clone())
    }

    /// Returns snapshots of all cohorts, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Cohort> {
        let handles: Vec<_> = self.cohorts.iter().map(|entry| entry.value().clone()).collect();
        let mut cohorts: Vec<Cohort> = handles.iter().map(|handle| handle.lock().clone()).collect();
        cohorts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        cohorts
    }

    /// Returns the ids of all cohorts.
    #[must_use]
    pub fn cohort_ids(&self) -> Vec<CohortId> {
        self.cohorts.iter().map(|entry| *entry.key()).collect()
    }

    /// Returns the number of cohorts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    /// Returns true if no cohorts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    /// Applies a mutation to a cohort atomically.
    ///
    /// The closure receives a draft copy while the cohort lock is held. The
    /// draft replaces the stored cohort only when the closure returns `Ok`.
    /// Only the job manager mutates cohorts, so derived state stays in step
    /// with the stages.
    pub(crate) fn update<T, F>(&self, id: CohortId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Cohort) -> Result<T>,
    {
        let handle = self.handle(id)?;
        let mut guard = handle.lock();
        let mut draft = guard.clone();
        let output = mutate(&mut draft)?;
        *guard = draft;
        Ok(output)
    }

    /// Removes a cohort together with its stages.
    ///
    /// Refused while any stage holds a live job. Callers go through
    /// [`JobLifecycleManager::remove_cohort`](crate::jobs::JobLifecycleManager::remove_cohort)
    /// so the cohort's jobs are dropped too.
    pub(crate) fn remove(&self, id: CohortId) -> Result<Cohort> {
        let handle = self.handle(id)?;
        let guard = handle.lock();

        let live = guard.live_jobs();
        if !live.is_empty() {
            return Err(CohortflowError::conflict(format!(
                "cohort {id} has {} live job(s)",
                live.len()
            )));
        }

        self.cohorts.remove(&id);
        info!(cohort_id = %id, "Removed cohort");
        Ok(guard.clone())
    }
}

impl std::fmt::Debug for CohortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortRegistry")
            .field("cohorts", &self.cohorts.len())
            .finish()
    }
}
