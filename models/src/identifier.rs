// models/src/identifier.rs

use serde::{Deserialize, Serialize};

use crate::component::{ComponentFields, Entity, SnomedComponent, VersionFields};

/// An alternate identifier mapping an external scheme's code onto a
/// component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identifier {
    pub alternate_identifier: String,
    #[serde(flatten)]
    pub version: VersionFields,
    #[serde(flatten)]
    pub component: ComponentFields,
    pub identifier_scheme_id: String,
    pub referenced_component_id: String,
}

impl Identifier {
    pub const FIELD_ALTERNATE_IDENTIFIER: &'static str = "alternateIdentifier";

    pub fn new(
        alternate_identifier: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> Self {
        Identifier {
            alternate_identifier: alternate_identifier.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            identifier_scheme_id: identifier_scheme_id.to_string(),
            referenced_component_id: referenced_component_id.to_string(),
        }
    }
}

impl Entity for Identifier {
    const DOC_TYPE: &'static str = "identifier";
    const ID_FIELD: &'static str = Identifier::FIELD_ALTERNATE_IDENTIFIER;

    fn id(&self) -> String {
        self.alternate_identifier.clone()
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}

impl SnomedComponent for Identifier {
    fn component(&self) -> &ComponentFields {
        &self.component
    }

    fn component_mut(&mut self) -> &mut ComponentFields {
        &mut self.component
    }

    fn release_hash_source(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.alternate_identifier,
            self.component.active,
            self.component.module_id,
            self.identifier_scheme_id,
            self.referenced_component_id
        )
    }
}
