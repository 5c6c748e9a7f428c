// models/src/query_concept.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::component::{Entity, VersionFields};

/// A semantic-index row: one per (branch, concept, stated|inferred form),
/// materialising the concept's ancestor closure and attribute map. The
/// attribute map also maintains an `all` entry holding the union of every
/// attribute's destinations, which terms queries address as `attr.all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryConcept {
    pub concept_id: i64,
    #[serde(flatten)]
    pub version: VersionFields,
    pub stated: bool,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub parents: BTreeSet<i64>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub ancestors: BTreeSet<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attr: BTreeMap<String, BTreeSet<i64>>,
}

impl QueryConcept {
    pub const FIELD_CONCEPT_ID: &'static str = "conceptId";
    pub const FIELD_STATED: &'static str = "stated";
    pub const FIELD_ANCESTORS: &'static str = "ancestors";
    /// Wildcard attribute entry: the union of all attribute destinations.
    pub const FIELD_ATTR_WILDCARD: &'static str = "attr.all";
    pub const ATTR_TYPE_WILDCARD: &'static str = "all";

    pub fn new(concept_id: i64, stated: bool) -> Self {
        QueryConcept {
            concept_id,
            stated,
            ..QueryConcept::default()
        }
    }

    /// The form key used to build the row's id: `<conceptId>_<s|i>`.
    pub fn form_suffix(stated: bool) -> &'static str {
        if stated {
            "s"
        } else {
            "i"
        }
    }

    pub fn add_attribute(&mut self, type_id: i64, destination_id: i64) {
        self.attr.entry(type_id.to_string()).or_default().insert(destination_id);
        self.attr
            .entry(Self::ATTR_TYPE_WILDCARD.to_string())
            .or_default()
            .insert(destination_id);
    }
}

impl Entity for QueryConcept {
    const DOC_TYPE: &'static str = "queryconcept";
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> String {
        format!("{}_{}", self.concept_id, QueryConcept::form_suffix(self.stated))
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}
