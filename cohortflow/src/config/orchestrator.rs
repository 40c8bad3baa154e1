//! Runtime settings for the job lifecycle manager.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{CohortflowError, Result};

/// Where job progress comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// A periodic tick driver advances running jobs.
    #[default]
    Simulated,
    /// Progress arrives only as processing engine signals.
    External,
}

/// Configuration for the job lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Progress source for running jobs.
    #[serde(default)]
    pub progress_mode: ProgressMode,
    /// Interval between simulated ticks in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Smallest progress increment per tick.
    #[serde(default = "default_tick_step_min")]
    pub tick_step_min: u8,
    /// Largest progress increment per tick.
    #[serde(default = "default_tick_step_max")]
    pub tick_step_max: u8,
    /// Progress assigned to a freshly started stage.
    #[serde(default = "default_start_progress_floor")]
    pub start_progress_floor: u8,
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_tick_step_min() -> u8 {
    5
}

fn default_tick_step_max() -> u8 {
    15
}

fn default_start_progress_floor() -> u8 {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progress_mode: ProgressMode::default(),
            tick_interval_ms: default_tick_interval_ms(),
            tick_step_min: default_tick_step_min(),
            tick_step_max: default_tick_step_max(),
            start_progress_floor: default_start_progress_floor(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress mode.
    #[must_use]
    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress_mode = mode;
        self
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }

    /// Sets a fixed tick step.
    #[must_use]
    pub fn with_tick_step(mut self, step: u8) -> Self {
        self.tick_step_min = step;
        self.tick_step_max = step;
        self
    }

    /// Sets the tick step range.
    #[must_use]
    pub fn with_tick_step_range(mut self, min: u8, max: u8) -> Self {
        self.tick_step_min = min;
        self.tick_step_max = max;
        self
    }

    /// Sets the start progress floor.
    #[must_use]
    pub fn with_start_progress_floor(mut self, floor: u8) -> Self {
        self.start_progress_floor = floor;
        self
    }

    /// Gets the tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Checks the settings for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(CohortflowError::InvalidRequest(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.tick_step_min == 0 || self.tick_step_min > self.tick_step_max || self.tick_step_max > 100 {
            return Err(CohortflowError::InvalidRequest(format!(
                "invalid tick step range {}..={}",
                self.tick_step_min, self.tick_step_max
            )));
        }
        if self.start_progress_floor == 0 || self.start_progress_floor >= 100 {
            return Err(CohortflowError::InvalidRequest(format!(
                "start_progress_floor must be within 1..=99, got {}",
                self.start_progress_floor
            )));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.progress_mode, ProgressMode::Simulated);
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_builder() {
        let config = OrchestratorConfig::new()
            .with_progress_mode(ProgressMode::External)
            .with_tick_step(20)
            .with_start_progress_floor(5);

        assert_eq!(config.progress_mode, ProgressMode::External);
        assert_eq!(config.tick_step_min, 20);
        assert_eq!(config.tick_step_max, 20);
        assert_eq!(config.start_progress_floor, 5);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let bad = [
            OrchestratorConfig::new().with_tick_step_range(10, 5),
            OrchestratorConfig::new().with_tick_step(0),
            OrchestratorConfig::new().with_start_progress_floor(0),
            OrchestratorConfig::new().with_tick_interval_ms(0),
        ];
        for config in bad {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), "invalid_request");
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        let err = OrchestratorConfig::from_json_str(r#"{"start_progress_floor": 100}"#).unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[test]
    fn test_from_json_partial() {
        let config = OrchestratorConfig::from_json_str(r#"{"progress_mode": "external"}"#).unwrap();
        assert_eq!(config.progress_mode, ProgressMode::External);
        assert_eq!(config.tick_step_max, 15);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tick_interval_ms": 50, "tick_step_min": 10, "tick_step_max": 10}}"#).unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.tick_step_min, 10);
    }

    #[test]
    fn test_from_missing_file() {
        let err = OrchestratorConfig::from_file("/nonexistent/cohortflow.json").unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
