// models/src/report.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::concept_mini::ConceptMini;

/// Reference-integrity findings for a branch. Empty sub-maps are omitted
/// from serialisation; the report is empty iff all four are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrityIssueReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships_with_missing_or_inactive_source: Option<BTreeMap<i64, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships_with_missing_or_inactive_type: Option<BTreeMap<i64, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships_with_missing_or_inactive_destination: Option<BTreeMap<i64, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axioms_with_missing_or_inactive_referenced_concept: Option<BTreeMap<String, ConceptMini>>,
}

impl IntegrityIssueReport {
    pub fn is_empty(&self) -> bool {
        self.relationships_with_missing_or_inactive_source
            .as_ref()
            .map_or(true, BTreeMap::is_empty)
            && self
                .relationships_with_missing_or_inactive_type
                .as_ref()
                .map_or(true, BTreeMap::is_empty)
            && self
                .relationships_with_missing_or_inactive_destination
                .as_ref()
                .map_or(true, BTreeMap::is_empty)
            && self
                .axioms_with_missing_or_inactive_referenced_concept
                .as_ref()
                .map_or(true, BTreeMap::is_empty)
    }

    /// Assemble a report, leaving empty maps out.
    pub fn of(
        axioms: BTreeMap<String, ConceptMini>,
        source: BTreeMap<i64, i64>,
        type_: BTreeMap<i64, i64>,
        destination: BTreeMap<i64, i64>,
    ) -> Self {
        IntegrityIssueReport {
            relationships_with_missing_or_inactive_source: if source.is_empty() {
                None
            } else {
                Some(source)
            },
            relationships_with_missing_or_inactive_type: if type_.is_empty() { None } else { Some(type_) },
            relationships_with_missing_or_inactive_destination: if destination.is_empty() {
                None
            } else {
                Some(destination)
            },
            axioms_with_missing_or_inactive_referenced_concept: if axioms.is_empty() {
                None
            } else {
                Some(axioms)
            },
        }
    }
}

/// Stale semantic-index rows found by the operator cross-check, partitioned
/// by form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConceptsInForm {
    pub stated_concept_ids: Vec<i64>,
    pub inferred_concept_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_omits_all_maps() {
        let report = IntegrityIssueReport::of(
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(report.is_empty());
        assert_eq!(serde_json::to_string(&report).unwrap(), "{}");
    }

    #[test]
    fn report_with_destination_issue_serialises_only_that_map() {
        let mut destination = BTreeMap::new();
        destination.insert(7000_i64, 100000_i64);
        let report =
            IntegrityIssueReport::of(BTreeMap::new(), BTreeMap::new(), BTreeMap::new(), destination);
        assert!(!report.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("relationshipsWithMissingOrInactiveDestination").is_some());
        assert!(json.get("relationshipsWithMissingOrInactiveSource").is_none());
    }
}
