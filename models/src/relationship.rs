// models/src/relationship.rs

use serde::{Deserialize, Serialize};

use crate::component::{ComponentFields, Entity, SnomedComponent, VersionFields};

/// A stated, inferred or additional relationship. Concrete-value
/// relationships carry `value` instead of `destination_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relationship {
    pub relationship_id: String,
    #[serde(flatten)]
    pub version: VersionFields,
    #[serde(flatten)]
    pub component: ComponentFields,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub relationship_group: i32,
    pub type_id: String,
    pub characteristic_type_id: String,
    pub modifier_id: String,
}

impl Relationship {
    pub const FIELD_RELATIONSHIP_ID: &'static str = "relationshipId";
    pub const FIELD_SOURCE_ID: &'static str = "sourceId";
    pub const FIELD_DESTINATION_ID: &'static str = "destinationId";
    pub const FIELD_TYPE_ID: &'static str = "typeId";
    pub const FIELD_CHARACTERISTIC_TYPE_ID: &'static str = "characteristicTypeId";

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relationship_id: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        source_id: &str,
        destination_id: &str,
        relationship_group: i32,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> Self {
        Relationship {
            relationship_id: relationship_id.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            source_id: source_id.to_string(),
            destination_id: Some(destination_id.to_string()),
            value: None,
            relationship_group,
            type_id: type_id.to_string(),
            characteristic_type_id: characteristic_type_id.to_string(),
            modifier_id: modifier_id.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_concrete(
        relationship_id: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        source_id: &str,
        value: &str,
        relationship_group: i32,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> Self {
        Relationship {
            relationship_id: relationship_id.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            source_id: source_id.to_string(),
            destination_id: None,
            value: Some(value.to_string()),
            relationship_group,
            type_id: type_id.to_string(),
            characteristic_type_id: characteristic_type_id.to_string(),
            modifier_id: modifier_id.to_string(),
        }
    }

    /// True when the relationship carries a concrete value rather than a
    /// destination concept.
    pub fn concrete(&self) -> bool {
        self.value.is_some()
    }
}

impl Entity for Relationship {
    const DOC_TYPE: &'static str = "relationship";
    const ID_FIELD: &'static str = Relationship::FIELD_RELATIONSHIP_ID;

    fn id(&self) -> String {
        self.relationship_id.clone()
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}

impl SnomedComponent for Relationship {
    fn component(&self) -> &ComponentFields {
        &self.component
    }

    fn component_mut(&mut self) -> &mut ComponentFields {
        &mut self.component
    }

    fn release_hash_source(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.relationship_id,
            self.component.active,
            self.component.module_id,
            self.source_id,
            self.destination_id.as_deref().unwrap_or(""),
            self.value.as_deref().unwrap_or(""),
            self.relationship_group,
            self.type_id,
            self.characteristic_type_id
        )
    }
}
