//! Side table of per-job tick drivers.
//!
//! Each running job in simulated mode has one background task that sleeps
//! for the tick interval and then invokes a tick callback. Entries are keyed
//! by job id so that pause and cancel stop a driver with a single lookup.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::model::JobId;

/// What a tick driver does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// Schedule another tick.
    Continue,
    /// Stop the driver.
    Stop,
}

struct TickerEntry {
    token: Arc<CancellationToken>,
    handle: JoinHandle<()>,
}

/// Table of live tick drivers keyed by job id.
#[derive(Default)]
pub struct TickerTable {
    entries: DashMap<JobId, TickerEntry>,
}

impl TickerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a tick driver for a job, replacing any existing one.
    ///
    /// Returns false when called outside a tokio runtime.
    pub fn start<F>(&self, job_id: JobId, interval: Duration, mut on_tick: F) -> bool
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %job_id, "No tokio runtime; tick driver not started");
            return false;
        };

        self.stop(job_id, "replaced");

        let token = Arc::new(CancellationToken::new());
        let task_token = token.clone();
        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = task_token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                if task_token.is_cancelled() || on_tick() == TickControl::Stop {
                    break;
                }
            }
            debug!(job_id = %job_id, reason = ?task_token.reason(), "Tick driver exited");
        });

        self.entries.insert(job_id, TickerEntry { token, handle });
        true
    }

    /// Stops the driver for a job. Returns true if one was running.
    pub fn stop(&self, job_id: JobId, reason: &str) -> bool {
        match self.entries.remove(&job_id) {
            Some((_, entry)) => {
                entry.token.cancel(reason);
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stops every driver.
    pub fn stop_all(&self, reason: &str) {
        let ids: Vec<JobId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for job_id in ids {
            self.stop(job_id, reason);
        }
    }

    /// Returns true if a driver is registered for the job.
    #[must_use]
    pub fn is_active(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Returns the number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no drivers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TickerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerTable")
            .field("active", &self.entries.len())
            .finish()
    }
}
