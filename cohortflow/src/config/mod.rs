//! Configuration types.
//!
//! - [`OrchestratorConfig`]: runtime settings for the lifecycle manager
//! - [`StageConfig`]: per-stage payloads stored on stages and forwarded to engines

mod orchestrator;
mod stage;

pub use orchestrator::{OrchestratorConfig, ProgressMode};
pub use stage::{ConvertConfig, DeidentifyConfig, ExtractConfig, SortConfig, StageConfig};
