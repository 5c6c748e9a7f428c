// models/src/concept.rs

use serde::{Deserialize, Serialize};

use crate::component::{ComponentFields, Entity, SnomedComponent, VersionFields};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Concept {
    pub concept_id: String,
    #[serde(flatten)]
    pub version: VersionFields,
    #[serde(flatten)]
    pub component: ComponentFields,
    pub definition_status_id: String,
}

impl Concept {
    pub const FIELD_CONCEPT_ID: &'static str = "conceptId";
    pub const FIELD_DEFINITION_STATUS_ID: &'static str = "definitionStatusId";

    pub fn new(
        concept_id: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        definition_status_id: &str,
    ) -> Self {
        Concept {
            concept_id: concept_id.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            definition_status_id: definition_status_id.to_string(),
        }
    }
}

impl Entity for Concept {
    const DOC_TYPE: &'static str = "concept";
    const ID_FIELD: &'static str = Concept::FIELD_CONCEPT_ID;

    fn id(&self) -> String {
        self.concept_id.clone()
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}

impl SnomedComponent for Concept {
    fn component(&self) -> &ComponentFields {
        &self.component
    }

    fn component_mut(&mut self) -> &mut ComponentFields {
        &mut self.component
    }

    fn release_hash_source(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.concept_id, self.component.active, self.component.module_id, self.definition_status_id
        )
    }
}
