// mrcm_service/src/model.rs

/// The modelling rulebook: three reference sets describing which domains
/// exist, which attributes apply to which domains, and what ranges those
/// attributes accept.
#[derive(Debug, Clone, Default)]
pub struct Mrcm {
    pub domains: Vec<Domain>,
    pub attribute_domains: Vec<AttributeDomain>,
    pub attribute_ranges: Vec<AttributeRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStrength {
    Mandatory,
    Optional,
}

impl RuleStrength {
    pub fn from_concept_id(concept_id: &str) -> Option<RuleStrength> {
        match concept_id {
            "723597001" => Some(RuleStrength::Mandatory),
            "723598006" => Some(RuleStrength::Optional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    All,
    Precoordinated,
    NewPrecoordinated,
    Postcoordinated,
}

impl ContentType {
    pub fn from_concept_id(concept_id: &str) -> Option<ContentType> {
        match concept_id {
            "723596005" => Some(ContentType::All),
            "723593002" => Some(ContentType::Precoordinated),
            "723594008" => Some(ContentType::NewPrecoordinated),
            "723595009" => Some(ContentType::Postcoordinated),
            _ => None,
        }
    }

    pub fn applies_to_precoordination(&self) -> bool {
        matches!(
            self,
            ContentType::All | ContentType::Precoordinated | ContentType::NewPrecoordinated
        )
    }

    pub fn applies_to_postcoordination(&self) -> bool {
        matches!(self, ContentType::All | ContentType::Postcoordinated)
    }
}

/// One row of the MRCM domain refset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    /// The member id of the backing refset row.
    pub id: String,
    pub referenced_component_id: String,
    pub domain_constraint: String,
    pub parent_domain: String,
    pub proximal_primitive_constraint: String,
    pub proximal_primitive_refinement: String,
    pub domain_template_for_precoordination: String,
    pub domain_template_for_postcoordination: String,
}

/// One row of the MRCM attribute-domain refset: an attribute applied to a
/// domain with cardinalities and grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDomain {
    pub id: String,
    pub referenced_component_id: String,
    pub domain_id: String,
    pub grouped: bool,
    pub attribute_cardinality: String,
    pub attribute_in_group_cardinality: String,
    pub rule_strength: RuleStrength,
    pub content_type: ContentType,
}

/// One row of the MRCM attribute-range refset: the values an attribute
/// accepts, plus the generated attribute rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRange {
    pub id: String,
    pub referenced_component_id: String,
    pub range_constraint: String,
    pub attribute_rule: String,
    pub rule_strength: RuleStrength,
    pub content_type: ContentType,
}
