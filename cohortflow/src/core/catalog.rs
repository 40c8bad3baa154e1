//! The static catalog of pipeline stages.

use super::StageId;
use serde::Serialize;

/// Static description of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    /// The stage id.
    pub id: StageId,
    /// Human-readable label.
    pub label: &'static str,
    /// Whether a cohort may omit this stage entirely.
    pub optional: bool,
}

/// The ordered stage catalog.
pub const STAGE_CATALOG: [StageDefinition; 4] = [
    StageDefinition {
        id: StageId::Deidentify,
        label: "De-identification",
        optional: true,
    },
    StageDefinition {
        id: StageId::Extract,
        label: "Metadata Extraction",
        optional: false,
    },
    StageDefinition {
        id: StageId::Sort,
        label: "Classification & Sorting",
        optional: false,
    },
    StageDefinition {
        id: StageId::Convert,
        label: "Format Conversion",
        optional: false,
    },
];

/// Looks up the catalog entry for a stage.
#[must_use]
pub fn definition(id: StageId) -> &'static StageDefinition {
    // The catalog is indexed by declaration order.
    &STAGE_CATALOG[id as usize]
}

/// Returns the stage ids a cohort owns, in catalog order.
///
/// When de-identification is disabled the stage is absent, not skipped.
#[must_use]
pub fn stages_for(deidentify_enabled: bool) -> Vec<StageId> {
    STAGE_CATALOG
        .iter()
        .filter(|def| deidentify_enabled || def.id != StageId::Deidentify)
        .map(|def| def.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_ordered() {
        let ids: Vec<_> = STAGE_CATALOG.iter().map(|d| d.id).collect();
        assert_eq!(ids, StageId::ALL.to_vec());
    }

    #[test]
    fn test_definition_lookup() {
        for id in StageId::ALL {
            assert_eq!(definition(id).id, id);
        }
        assert!(definition(StageId::Deidentify).optional);
        assert!(!definition(StageId::Convert).optional);
    }

    #[test]
    fn test_stages_without_deidentify() {
        let ids = stages_for(false);
        assert_eq!(ids, vec![StageId::Extract, StageId::Sort, StageId::Convert]);
    }

    #[test]
    fn test_stages_with_deidentify() {
        assert_eq!(stages_for(true).len(), 4);
        assert_eq!(stages_for(true)[0], StageId::Deidentify);
    }
}
