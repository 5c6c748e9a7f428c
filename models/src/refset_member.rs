// models/src/refset_member.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentFields, Entity, SnomedComponent, VersionFields};

/// A reference-set member row. The typed columns cover every refset; the
/// per-refset tail of columns lives in `additional_fields`, keyed by the
/// column names from the RF2 header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceSetMember {
    pub member_id: String,
    #[serde(flatten)]
    pub version: VersionFields,
    #[serde(flatten)]
    pub component: ComponentFields,
    pub refset_id: String,
    pub referenced_component_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: BTreeMap<String, String>,
}

impl ReferenceSetMember {
    pub const FIELD_MEMBER_ID: &'static str = "memberId";
    pub const FIELD_REFSET_ID: &'static str = "refsetId";
    pub const FIELD_REFERENCED_COMPONENT_ID: &'static str = "referencedComponentId";
    pub const FIELD_ADDITIONAL_FIELDS_PREFIX: &'static str = "additionalFields";

    /// Additional-field key carrying the logical definition of an OWL axiom
    /// member.
    pub const OWL_EXPRESSION: &'static str = "owlExpression";

    pub fn new(
        member_id: &str,
        effective_time: Option<i32>,
        active: bool,
        module_id: &str,
        refset_id: &str,
        referenced_component_id: &str,
    ) -> Self {
        ReferenceSetMember {
            member_id: member_id.to_string(),
            version: VersionFields::default(),
            component: ComponentFields {
                effective_time,
                active,
                module_id: module_id.to_string(),
                ..ComponentFields::default()
            },
            refset_id: refset_id.to_string(),
            referenced_component_id: referenced_component_id.to_string(),
            additional_fields: BTreeMap::new(),
        }
    }

    pub fn additional_field(&self, name: &str) -> Option<&str> {
        self.additional_fields.get(name).map(String::as_str)
    }

    pub fn set_additional_field(&mut self, name: &str, value: &str) {
        self.additional_fields.insert(name.to_string(), value.to_string());
    }
}

impl Entity for ReferenceSetMember {
    const DOC_TYPE: &'static str = "member";
    const ID_FIELD: &'static str = ReferenceSetMember::FIELD_MEMBER_ID;

    fn id(&self) -> String {
        self.member_id.clone()
    }

    fn version(&self) -> &VersionFields {
        &self.version
    }

    fn version_mut(&mut self) -> &mut VersionFields {
        &mut self.version
    }
}

impl SnomedComponent for ReferenceSetMember {
    fn component(&self) -> &ComponentFields {
        &self.component
    }

    fn component_mut(&mut self) -> &mut ComponentFields {
        &mut self.component
    }

    fn release_hash_source(&self) -> String {
        let mut source = format!(
            "{}\t{}\t{}\t{}\t{}",
            self.member_id,
            self.component.active,
            self.component.module_id,
            self.refset_id,
            self.referenced_component_id
        );
        for (name, value) in &self.additional_fields {
            source.push('\t');
            source.push_str(name);
            source.push('=');
            source.push_str(value);
        }
        source
    }
}
