//! Per-stage configuration payloads.
//!
//! The core never interprets these beyond storing, merging, and forwarding
//! them to the processing engine; the typed shape only guarantees that a
//! payload stored on a stage belongs to that stage.

use serde::{Deserialize, Serialize};

use crate::core::StageId;
use crate::errors::{CohortflowError, Result};

/// Options for the de-identification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeidentifyConfig {
    /// Header tags to blank out.
    #[serde(default = "default_scrub_tags")]
    pub scrub_tags: Vec<String>,
    /// Replace study/series/instance UIDs with generated ones.
    #[serde(default = "default_true")]
    pub replace_uids: bool,
    /// Keep vendor private tags.
    #[serde(default)]
    pub keep_private_tags: bool,
    /// Shift all dates by this many days.
    #[serde(default)]
    pub date_shift_days: Option<i32>,
}

fn default_scrub_tags() -> Vec<String> {
    ["PatientName", "PatientID", "PatientBirthDate", "InstitutionName", "ReferringPhysicianName"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for DeidentifyConfig {
    fn default() -> Self {
        Self {
            scrub_tags: default_scrub_tags(),
            replace_uids: true,
            keep_private_tags: false,
            date_shift_days: None,
        }
    }
}

/// Tuning for the metadata extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Number of parallel extraction workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Files per extraction batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Extract private tags as well.
    #[serde(default)]
    pub include_private_tags: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    500
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            include_private_tags: false,
        }
    }
}

/// Classification profile selection for the sorting stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    /// Name of the classification profile.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Minimum confidence for an automatic classification.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_min_confidence() -> f32 {
    0.8
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Output layout options for the conversion stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Target format name.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Directory layout template for converted files.
    #[serde(default = "default_layout")]
    pub layout: String,
    /// Compress output files.
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_output_format() -> String {
    "nifti".to_string()
}

fn default_layout() -> String {
    "{subject}/{session}/{modality}".to_string()
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            layout: default_layout(),
            compress: true,
        }
    }
}

/// Stage configuration, tagged by the stage it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    /// De-identification options.
    Deidentify(DeidentifyConfig),
    /// Extraction tuning.
    Extract(ExtractConfig),
    /// Classification profile.
    Sort(SortConfig),
    /// Conversion layout.
    Convert(ConvertConfig),
}

impl StageConfig {
    /// Returns the documented defaults for a stage.
    #[must_use]
    pub fn default_for(stage: StageId) -> Self {
        match stage {
            StageId::Deidentify => Self::Deidentify(DeidentifyConfig::default()),
            StageId::Extract => Self::Extract(ExtractConfig::default()),
            StageId::Sort => Self::Sort(SortConfig::default()),
            StageId::Convert => Self::Convert(ConvertConfig::default()),
        }
    }

    /// Returns the stage this configuration belongs to.
    #[must_use]
    pub fn stage_id(&self) -> StageId {
        match self {
            Self::Deidentify(_) => StageId::Deidentify,
            Self::Extract(_) => StageId::Extract,
            Self::Sort(_) => StageId::Sort,
            Self::Convert(_) => StageId::Convert,
        }
    }

    /// Checks the few constraints the core relies on.
    pub fn validate(&self) -> Result<()> {
        let stage = self.stage_id();
        match self {
            Self::Deidentify(_) => Ok(()),
            Self::Extract(cfg) => {
                if cfg.concurrency == 0 {
                    return Err(CohortflowError::invalid_config(stage, "concurrency must be at least 1"));
                }
                if cfg.batch_size == 0 {
                    return Err(CohortflowError::invalid_config(stage, "batch_size must be at least 1"));
                }
                Ok(())
            }
            Self::Sort(cfg) => {
                if cfg.profile.trim().is_empty() {
                    return Err(CohortflowError::invalid_config(stage, "profile must not be empty"));
                }
                if !(0.0..=1.0).contains(&cfg.min_confidence) {
                    return Err(CohortflowError::invalid_config(
                        stage,
                        "min_confidence must be between 0 and 1",
                    ));
                }
                Ok(())
            }
            Self::Convert(cfg) => {
                if cfg.output_format.trim().is_empty() || cfg.layout.trim().is_empty() {
                    return Err(CohortflowError::invalid_config(
                        stage,
                        "output_format and layout are required",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Applies a JSON merge patch and returns the resulting configuration.
    ///
    /// `null` leaves the configuration unchanged. A `null` member inside the
    /// patch resets that field to its default.
    pub fn merge_patch(&self, patch: &serde_json::Value) -> Result<Self> {
        let stage = self.stage_id();
        let patch_map = match patch {
            serde_json::Value::Null => return Ok(self.clone()),
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(CohortflowError::invalid_config(stage, "patch must be a JSON object"));
            }
        };

        if let Some(tag) = patch_map.get("stage") {
            if tag.as_str() != Some(stage.as_str()) {
                return Err(CohortflowError::invalid_config(
                    stage,
                    format!("patch is tagged for {tag}"),
                ));
            }
        }

        let mut merged = serde_json::to_value(self)?;
        merge_json(&mut merged, patch);

        let next: Self = serde_json::from_value(merged)
            .map_err(|e| CohortflowError::invalid_config(stage, e.to_string()))?;
        next.validate()?;
        Ok(next)
    }
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    merge_json(
                        target_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults_match_stage() {
        for stage in StageId::ALL {
            let cfg = StageConfig::default_for(stage);
            assert_eq!(cfg.stage_id(), stage);
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn test_serialized_shape_is_tagged() {
        let cfg = StageConfig::default_for(StageId::Extract);
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["stage"], json!("extract"));
        assert_eq!(value["concurrency"], json!(4));
    }

    #[test]
    fn test_merge_patch_overrides_fields() {
        let cfg = StageConfig::default_for(StageId::Extract);
        let merged = cfg.merge_patch(&json!({"concurrency": 16})).unwrap();

        assert_eq!(
            merged,
            StageConfig::Extract(ExtractConfig {
                concurrency: 16,
                ..ExtractConfig::default()
            })
        );
    }

    #[test]
    fn test_merge_patch_null_member_resets_default() {
        let cfg = StageConfig::Sort(SortConfig {
            profile: "neuro".to_string(),
            min_confidence: 0.5,
        });
        let merged = cfg.merge_patch(&json!({"profile": null})).unwrap();

        match merged {
            StageConfig::Sort(sort) => {
                assert_eq!(sort.profile, "default");
                assert!((sort.min_confidence - 0.5).abs() < f32::EPSILON);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_merge_patch_null_is_noop() {
        let cfg = StageConfig::default_for(StageId::Convert);
        assert_eq!(cfg.merge_patch(&serde_json::Value::Null).unwrap(), cfg);
    }

    #[test]
    fn test_merge_patch_rejects_other_stage() {
        let cfg = StageConfig::default_for(StageId::Sort);
        let err = cfg.merge_patch(&json!({"stage": "convert"})).unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn test_merge_patch_rejects_non_object() {
        let cfg = StageConfig::default_for(StageId::Sort);
        assert!(cfg.merge_patch(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_merge_patch_validates_result() {
        let cfg = StageConfig::default_for(StageId::Extract);
        let err = cfg.merge_patch(&json!({"concurrency": 0})).unwrap_err();
        assert!(err.to_string().contains("concurrency"));

        let err = cfg.merge_patch(&json!({"batch_size": "many"})).unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }
}
