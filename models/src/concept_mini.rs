// models/src/concept_mini.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A compact concept descriptor used in reports: id plus joined display
/// terms, with an open extra-field map for report-specific payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConceptMini {
    pub concept_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pt: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, serde_json::Value>,
}

impl ConceptMini {
    pub const EXTRA_MISSING_OR_INACTIVE: &'static str = "missingOrInactiveConcepts";

    pub fn new(concept_id: &str) -> Self {
        ConceptMini {
            concept_id: concept_id.to_string(),
            ..ConceptMini::default()
        }
    }

    /// Merge bad references into the `missingOrInactiveConcepts` extra field.
    pub fn add_missing_or_inactive_concepts(&mut self, concept_ids: &BTreeSet<i64>) {
        let entry = self
            .extra_fields
            .entry(Self::EXTRA_MISSING_OR_INACTIVE.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(values) = entry {
            let mut merged: BTreeSet<i64> = values.iter().filter_map(|v| v.as_i64()).collect();
            merged.extend(concept_ids.iter().copied());
            *values = merged.into_iter().map(serde_json::Value::from).collect();
        }
    }
}
