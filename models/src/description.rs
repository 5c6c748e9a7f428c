// models/src/description.rs

use serde::{Deserialize, Serialize};

use crate::component::{ComponentFields, Entity, SnomedComponent, VersionFields};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Description {
    pub description_id: String,
    #[serde(flatten)]
    pub version: VersionFields,
    #[serde(flatten)]
    pub component: ComponentFields,
    pub concept_id: String,
    pub language_code: String,
    pub type_id: String,
    pub term: String,
    pub case_significance_id: String,
}

impl Description {
    pub const FIELD_DESCRIPTION_ID: &'static str = "descriptionId";
    pub const FIELD_CONCEPT_ID: &'static str = "conceptId";
    pub const FIELD_TYPE_ID: &'static str = "typeId";
    pub const FIELD_TERM: &'static str = "term";

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        description_id: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        concept_id: &str,
        language_code: &str,
        type_id: &str,
        term: &str,
        case_significance_id: &str,
    ) -> Self {
        Description {
            description_id: description_id.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            concept_id: concept_id.to_string(),
            language_code: language_code.to_string(),
            type_id: type_id.to_string(),
            term: term.to_string(),
            case_significance_id: case_significance_id.to_string(),
        }
    }
}

impl Entity for Description {
    const DOC_TYPE: &'static str = "description";
    const ID_FIELD: &'static str = Description::FIELD_DESCRIPTION_ID;

    fn id(&self) -> String {
        self.description_id.clone()
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}

impl SnomedComponent for Description {
    fn component(&self) -> &ComponentFields {
        &self.component
    }

    fn component_mut(&mut self) -> &mut ComponentFields {
        &mut self.component
    }

    fn release_hash_source(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.description_id,
            self.component.active,
            self.component.module_id,
            self.concept_id,
            self.language_code,
            self.type_id,
            self.term,
            self.case_significance_id
        )
    }
}
