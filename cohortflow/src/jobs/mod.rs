//! Job lifecycle: the per-job state machine, its progress sources, and the
//! processing engine port.
//!
//! - [`JobLifecycleManager`] owns job records and applies control actions.
//! - Simulated progress comes from per-job tick drivers kept in a side table.
//! - External progress arrives as [`EngineSignal`]s.

mod engine;
mod manager;
mod ticker;

mod scenario_tests;

pub use engine::{EngineSignal, NoOpEngine, ProcessingEngine};
pub use manager::{JobLifecycleManager, JobLifecycleManagerBuilder, CANCELED_BY_USER};
pub use ticker::{TickControl, TickerTable};

#[cfg(test)]
pub use engine::MockProcessingEngine;
